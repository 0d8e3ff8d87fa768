//! The `aerolab_core` crate is the modeling engine behind Aerolab's
//! control-system analysis tools. It builds simulatable, linearizable
//! dynamical systems from symbolic expressions.
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `ControlledSystem`
//!   (vector fields with inputs), `Steppable` (solvers).
//! - **Expr**: a small symbolic expression language with differentiation,
//!   simplification, and compilation to a stack-VM bytecode.
//! - **Solvers**: fixed-step numerical integrators (RK4, Tsit5).
//! - **StateSpace**: the symbolic model builder and simulator.
//! - **Linearize**: Jacobian-based linearization about an operating point.

pub mod error;
pub mod expr;
pub mod linearize;
pub mod solvers;
pub mod statespace;
pub mod traits;

pub use error::{CoreError, CoreResult};
pub use linearize::{LinearModel, LtiSystem};
pub use solvers::SolverKind;
pub use statespace::{StateSpace, Trajectory};
