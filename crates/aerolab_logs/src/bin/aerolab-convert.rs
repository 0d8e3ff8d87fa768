use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use aerolab_logs::{convert_tree, ConvertOptions};

#[derive(Parser)]
#[command(name = "aerolab-convert")]
#[command(about = "Convert binary flight logs under a directory tree to CSV", long_about = None)]
struct Cli {
    /// Root directory to scan for logs
    root: PathBuf,
    /// Dump invocation run per log file, e.g. "python sdlog2_dump.py"
    #[arg(long, default_value = "python sdlog2_dump.py")]
    dump: String,
    /// Log file extension to match (without the dot)
    #[arg(long, default_value = "px4log")]
    extension: String,
    /// Keep the binary originals after conversion
    #[arg(long)]
    keep: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let options = ConvertOptions {
        dump_command: cli.dump.split_whitespace().map(str::to_owned).collect(),
        extension: cli.extension,
        keep_originals: cli.keep,
    };

    let summary = convert_tree(&cli.root, &options)?;
    println!(
        "scanned {} logs: {} converted, {} failed",
        summary.scanned, summary.converted, summary.failed
    );
    Ok(())
}
