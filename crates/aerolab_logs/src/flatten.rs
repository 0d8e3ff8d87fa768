//! Flattening dumped CSV logs into nested message/field tables.
//!
//! Dump tools emit one wide CSV whose header cells are `MSG_field` names
//! (e.g. `ATT_Roll`, `GPS_Lat`). The flattener splits each header at the
//! first underscore and regroups the columns per message, keeping only the
//! numeric ones.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};

use crate::error::{LogError, LogResult};

/// A dumped log regrouped as message -> field -> column of samples.
///
/// Blank cells read as 0.0; a column containing any non-numeric cell is
/// dropped whole, keeping the table numeric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTable {
    columns: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
    rows: usize,
}

impl LogTable {
    pub fn from_reader<R: Read>(reader: R) -> LogResult<Self> {
        let mut lines = BufReader::new(reader).lines();
        let header = match lines.next() {
            Some(line) => line.map_err(read_error)?,
            None => {
                return Err(LogError::MalformedCsv {
                    reason: "empty file".to_string(),
                })
            }
        };
        let names: Vec<(String, String)> = header
            .split(',')
            .map(|cell| split_field_name(cell.trim()))
            .collect::<LogResult<_>>()?;

        let mut columns: Vec<Option<Vec<f64>>> = vec![Some(Vec::new()); names.len()];
        let mut rows = 0usize;
        for line in lines {
            let line = line.map_err(read_error)?;
            if line.is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split(',').collect();
            if cells.len() != names.len() {
                return Err(LogError::MalformedCsv {
                    reason: format!(
                        "row {} has {} cells, header has {}",
                        rows + 1,
                        cells.len(),
                        names.len()
                    ),
                });
            }
            for (column, cell) in columns.iter_mut().zip(cells) {
                let Some(values) = column else { continue };
                let cell = cell.trim();
                if cell.is_empty() {
                    values.push(0.0);
                } else if let Ok(value) = cell.parse::<f64>() {
                    values.push(value);
                } else {
                    *column = None;
                }
            }
            rows += 1;
        }

        let mut table: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
        for ((message, field), column) in names.into_iter().zip(columns) {
            if let Some(values) = column {
                table.entry(message).or_default().insert(field, values);
            }
        }
        Ok(Self {
            columns: table,
            rows,
        })
    }

    /// Number of data rows in the source file.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Message names, sorted.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Field names recorded for one message, sorted.
    pub fn fields(&self, message: &str) -> impl Iterator<Item = &str> {
        self.columns
            .get(message)
            .into_iter()
            .flat_map(|fields| fields.keys().map(String::as_str))
    }

    /// One numeric column, if it survived parsing.
    pub fn column(&self, message: &str, field: &str) -> Option<&[f64]> {
        self.columns
            .get(message)?
            .get(field)
            .map(Vec::as_slice)
    }
}

fn read_error(source: std::io::Error) -> LogError {
    LogError::MalformedCsv {
        reason: source.to_string(),
    }
}

fn split_field_name(name: &str) -> LogResult<(String, String)> {
    match name.split_once('_') {
        Some((message, field)) if !message.is_empty() && !field.is_empty() => {
            Ok((message.to_string(), field.to_string()))
        }
        _ => Err(LogError::MalformedCsv {
            reason: format!("header cell `{name}` is not MSG_field"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn groups_columns_by_message() {
        let csv = "ATT_Roll,ATT_Pitch,GPS_Lat\n1.0,2.0,3.5\n,-1,4.5\n";
        let table = LogTable::from_reader(csv.as_bytes()).expect("table");
        assert_eq!(table.len(), 2);
        assert_eq!(table.messages().collect::<Vec<_>>(), vec!["ATT", "GPS"]);
        assert_eq!(table.fields("ATT").collect::<Vec<_>>(), vec!["Pitch", "Roll"]);
        let pitch = table.column("ATT", "Pitch").expect("column");
        assert_relative_eq!(pitch[0], 2.0);
        assert_relative_eq!(pitch[1], -1.0);
    }

    #[test]
    fn blank_cells_read_as_zero() {
        let csv = "IMU_AccX\n\n1.5\n\n";
        let table = LogTable::from_reader(csv.as_bytes()).expect("table");
        // empty lines are skipped entirely, so only one row remains
        assert_eq!(table.len(), 1);

        let csv = "IMU_AccX,IMU_AccY\n,2.0\n1.0,\n";
        let table = LogTable::from_reader(csv.as_bytes()).expect("table");
        let acc_x = table.column("IMU", "AccX").expect("column");
        assert_relative_eq!(acc_x[0], 0.0);
        assert_relative_eq!(acc_x[1], 1.0);
    }

    #[test]
    fn non_numeric_columns_are_dropped_whole() {
        let csv = "IMU_AccX,TEXT_msg\n1.0,hello\n2.0,world\n";
        let table = LogTable::from_reader(csv.as_bytes()).expect("table");
        assert_eq!(table.messages().collect::<Vec<_>>(), vec!["IMU"]);
        assert!(table.column("TEXT", "msg").is_none());
        assert_eq!(table.column("IMU", "AccX").expect("column").len(), 2);
    }

    #[test]
    fn field_names_keep_extra_underscores() {
        let csv = "ATT_q_0,ATT_q_1\n0.5,0.6\n";
        let table = LogTable::from_reader(csv.as_bytes()).expect("table");
        assert_eq!(
            table.fields("ATT").collect::<Vec<_>>(),
            vec!["q_0", "q_1"]
        );
    }

    #[test]
    fn malformed_headers_and_rows_are_rejected() {
        assert!(matches!(
            LogTable::from_reader("".as_bytes()),
            Err(LogError::MalformedCsv { .. })
        ));
        assert!(matches!(
            LogTable::from_reader("NoUnderscore\n1.0\n".as_bytes()),
            Err(LogError::MalformedCsv { .. })
        ));
        assert!(matches!(
            LogTable::from_reader("A_x,B_y\n1.0\n".as_bytes()),
            Err(LogError::MalformedCsv { .. })
        ));
    }
}
