use std::cell::RefCell;

use nalgebra::{DMatrix, DVector};

use crate::error::{CoreError, CoreResult};
use crate::expr::{parse, Bytecode, Compiler, Expr, Vm};
use crate::linearize::Jacobians;
use crate::solvers::SolverKind;
use crate::traits::ControlledSystem;

/// A feedback control law: maps the current output vector to the next input.
pub type ControlLaw<'a> = &'a mut dyn FnMut(&[f64]) -> Vec<f64>;

/// A nonlinear state-space model built from symbolic expressions.
///
/// Holds the declared state/input symbol names, the symbolic dynamics vector
/// f(t, x, u) and output vector g(t, x, u), and the bytecode programs
/// compiled from them at construction. The compiled programs address plain
/// numeric slices through positional bindings, so evaluation never touches
/// symbol names again.
///
/// Immutable after construction; the Jacobian programs used by
/// [`StateSpace::linearize`] are compiled on first use and cached.
#[derive(Debug)]
pub struct StateSpace {
    pub(crate) states: Vec<String>,
    pub(crate) inputs: Vec<String>,
    pub(crate) f: Vec<Expr>,
    pub(crate) g: Vec<Expr>,
    pub(crate) f_prog: Vec<Bytecode>,
    pub(crate) g_prog: Vec<Bytecode>,
    pub(crate) compiler: Compiler,
    pub(crate) jacobians: RefCell<Option<Jacobians>>,
    // Scratch stack for the VM. Interior mutability keeps `apply` allocation
    // free; a StateSpace is Send but not Sync, one owner per run.
    pub(crate) stack: RefCell<Vec<f64>>,
}

impl StateSpace {
    /// Builds a model from parsed expressions.
    ///
    /// Fails if no state is declared, if the dynamics vector length does not
    /// match the state count, if names collide (or shadow the reserved `t`),
    /// or if any expression references an undeclared symbol.
    pub fn new(
        states: Vec<String>,
        inputs: Vec<String>,
        f: Vec<Expr>,
        g: Vec<Expr>,
    ) -> CoreResult<Self> {
        if states.is_empty() {
            return Err(CoreError::EmptyState);
        }
        if f.len() != states.len() {
            return Err(CoreError::DimensionMismatch {
                what: "dynamics vector f",
                expected: states.len(),
                actual: f.len(),
            });
        }
        let compiler = Compiler::new(&states, &inputs)?;
        let f_prog = f
            .iter()
            .map(|expr| compiler.compile(expr))
            .collect::<CoreResult<Vec<_>>>()?;
        let g_prog = g
            .iter()
            .map(|expr| compiler.compile(expr))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            states,
            inputs,
            f,
            g,
            f_prog,
            g_prog,
            compiler,
            jacobians: RefCell::new(None),
            stack: RefCell::new(Vec::with_capacity(64)),
        })
    }

    /// Convenience constructor parsing every expression from source text.
    pub fn parse<S: AsRef<str>>(states: &[S], inputs: &[S], f: &[S], g: &[S]) -> CoreResult<Self> {
        let to_names = |items: &[S]| items.iter().map(|s| s.as_ref().to_string()).collect();
        let to_exprs = |items: &[S]| -> CoreResult<Vec<Expr>> {
            items.iter().map(|s| parse(s.as_ref())).collect()
        };
        Self::new(to_names(states), to_names(inputs), to_exprs(f)?, to_exprs(g)?)
    }

    /// Declared state symbol names, in order.
    pub fn state_names(&self) -> &[String] {
        &self.states
    }

    /// Declared input symbol names, in order.
    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    /// Number of outputs (length of g).
    pub fn output_dimension(&self) -> usize {
        self.g.len()
    }

    pub(crate) fn eval_into(&self, programs: &[Bytecode], t: f64, x: &[f64], u: &[f64], out: &mut [f64]) {
        let mut stack = self.stack.borrow_mut();
        for (value, program) in out.iter_mut().zip(programs) {
            *value = Vm::execute(program, t, x, u, &mut stack);
        }
    }

    fn check_point(&self, x: &[f64], u: &[f64]) -> CoreResult<()> {
        if x.len() != self.states.len() {
            return Err(CoreError::DimensionMismatch {
                what: "state vector",
                expected: self.states.len(),
                actual: x.len(),
            });
        }
        if u.len() != self.inputs.len() {
            return Err(CoreError::DimensionMismatch {
                what: "input vector",
                expected: self.inputs.len(),
                actual: u.len(),
            });
        }
        Ok(())
    }

    /// Evaluates dx/dt = f(t, x, u).
    pub fn eval_dynamics(&self, t: f64, x: &[f64], u: &[f64]) -> CoreResult<DVector<f64>> {
        self.check_point(x, u)?;
        let mut out = DVector::zeros(self.states.len());
        self.eval_into(&self.f_prog, t, x, u, out.as_mut_slice());
        Ok(out)
    }

    /// Evaluates y = g(t, x, u).
    pub fn eval_output(&self, t: f64, x: &[f64], u: &[f64]) -> CoreResult<DVector<f64>> {
        self.check_point(x, u)?;
        let mut out = DVector::zeros(self.g.len());
        self.eval_into(&self.g_prog, t, x, u, out.as_mut_slice());
        Ok(out)
    }

    /// Integrates the system forward with the default RK4 stepper.
    ///
    /// See [`StateSpace::simulate_with`].
    pub fn simulate(
        &self,
        x0: &[f64],
        u0: &[f64],
        dt: f64,
        tf: f64,
        control: Option<ControlLaw<'_>>,
    ) -> CoreResult<Trajectory> {
        self.simulate_with(SolverKind::Rk4, x0, u0, dt, tf, control)
    }

    /// Integrates the system forward from x0 with fixed step dt until tf.
    ///
    /// Each iteration evaluates the output at the current (t, x, u), records
    /// the sample, optionally recomputes u by applying the control law to
    /// that output, then advances one solver step with the (possibly
    /// updated) input held constant. Samples are only recorded at times
    /// strictly before tf; the partial interval reaching tf is dropped.
    ///
    /// Errors on dimension mismatches, non-positive dt, a control law
    /// returning the wrong number of inputs, or a diverging integration
    /// (non-finite state).
    pub fn simulate_with(
        &self,
        solver: SolverKind,
        x0: &[f64],
        u0: &[f64],
        dt: f64,
        tf: f64,
        mut control: Option<ControlLaw<'_>>,
    ) -> CoreResult<Trajectory> {
        self.check_point(x0, u0)?;
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(CoreError::InvalidStep {
                what: "dt",
                value: dt,
            });
        }
        if !tf.is_finite() {
            return Err(CoreError::InvalidStep {
                what: "tf",
                value: tf,
            });
        }

        let n = self.states.len();
        let m = self.inputs.len();
        let p = self.g.len();

        let mut stepper = solver.build(n);
        let mut t = 0.0;
        let mut x = x0.to_vec();
        let mut u = u0.to_vec();
        let mut y = vec![0.0; p];
        let mut builder = TrajectoryBuilder::new(n, m, p);

        while t < tf {
            self.eval_into(&self.g_prog, t, &x, &u, &mut y);
            builder.push(t, &x, &u, &y);
            if let Some(law) = control.as_deref_mut() {
                let next = law(&y);
                if next.len() != m {
                    return Err(CoreError::ControlDimension {
                        expected: m,
                        actual: next.len(),
                    });
                }
                u = next;
            }
            stepper.step(self, &mut t, &mut x, &u, dt);
            if x.iter().any(|value| !value.is_finite()) {
                return Err(CoreError::Diverged { t });
            }
        }

        Ok(builder.finish())
    }
}

impl ControlledSystem<f64> for StateSpace {
    fn dimension(&self) -> usize {
        self.states.len()
    }

    fn input_dimension(&self) -> usize {
        self.inputs.len()
    }

    fn apply(&self, t: f64, x: &[f64], u: &[f64], out: &mut [f64]) {
        self.eval_into(&self.f_prog, t, x, u, out);
    }
}

/// A packed simulation record: one row per recorded sample.
///
/// Only produced by [`TrajectoryBuilder::finish`]; there is no way to
/// observe a partially recorded run.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    t: DVector<f64>,
    x: DMatrix<f64>,
    u: DMatrix<f64>,
    y: DMatrix<f64>,
}

impl Trajectory {
    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.len() == 0
    }

    pub fn times(&self) -> &DVector<f64> {
        &self.t
    }

    /// Sample-per-row state history.
    pub fn states(&self) -> &DMatrix<f64> {
        &self.x
    }

    /// Sample-per-row input history.
    pub fn inputs(&self) -> &DMatrix<f64> {
        &self.u
    }

    /// Sample-per-row output history.
    pub fn outputs(&self) -> &DMatrix<f64> {
        &self.y
    }
}

/// Accumulates samples in growable buffers, packing them into a
/// [`Trajectory`] once the run completes.
#[derive(Debug)]
pub struct TrajectoryBuilder {
    nx: usize,
    nu: usize,
    ny: usize,
    t: Vec<f64>,
    x: Vec<f64>,
    u: Vec<f64>,
    y: Vec<f64>,
}

impl TrajectoryBuilder {
    pub fn new(nx: usize, nu: usize, ny: usize) -> Self {
        Self {
            nx,
            nu,
            ny,
            t: Vec::new(),
            x: Vec::new(),
            u: Vec::new(),
            y: Vec::new(),
        }
    }

    pub fn push(&mut self, t: f64, x: &[f64], u: &[f64], y: &[f64]) {
        debug_assert_eq!(x.len(), self.nx);
        debug_assert_eq!(u.len(), self.nu);
        debug_assert_eq!(y.len(), self.ny);
        self.t.push(t);
        self.x.extend_from_slice(x);
        self.u.extend_from_slice(u);
        self.y.extend_from_slice(y);
    }

    pub fn finish(self) -> Trajectory {
        let samples = self.t.len();
        Trajectory {
            t: DVector::from_vec(self.t),
            x: DMatrix::from_row_slice(samples, self.nx, &self.x),
            u: DMatrix::from_row_slice(samples, self.nu, &self.u),
            y: DMatrix::from_row_slice(samples, self.ny, &self.y),
        }
    }
}
