use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Represents a controlled dynamical system dx/dt = f(t, x, u).
pub trait ControlledSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Returns the dimension of the input vector.
    fn input_dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// u: input vector held over the step
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], u: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward under a frozen input.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// input: input vector, constant across the step
    /// dt: step size
    fn step(
        &mut self,
        system: &impl ControlledSystem<T>,
        t: &mut T,
        state: &mut [T],
        input: &[T],
        dt: T,
    );
}
