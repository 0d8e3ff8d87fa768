use std::cell::{Ref, RefCell};

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::expr::{Bytecode, Expr, Vm};
use crate::solvers::SolverKind;
use crate::statespace::{ControlLaw, StateSpace, Trajectory};

/// Compiled symbolic Jacobian programs, row-major entry order.
///
/// Operating-point independent, so a StateSpace builds them once and reuses
/// them for every linearization.
#[derive(Debug)]
pub(crate) struct Jacobians {
    df_dx: Vec<Bytecode>,
    df_du: Vec<Bytecode>,
    dg_dx: Vec<Bytecode>,
    dg_du: Vec<Bytecode>,
}

impl Jacobians {
    fn build(model: &StateSpace) -> CoreResult<Self> {
        let block = |exprs: &[Expr], vars: &[String]| -> CoreResult<Vec<Bytecode>> {
            let mut programs = Vec::with_capacity(exprs.len() * vars.len());
            for expr in exprs {
                for var in vars {
                    let entry = expr.diff(var).simplify();
                    programs.push(model.compiler.compile(&entry)?);
                }
            }
            Ok(programs)
        };
        Ok(Self {
            df_dx: block(&model.f, &model.states)?,
            df_du: block(&model.f, &model.inputs)?,
            dg_dx: block(&model.g, &model.states)?,
            dg_du: block(&model.g, &model.inputs)?,
        })
    }
}

impl StateSpace {
    fn jacobian_programs(&self) -> CoreResult<Ref<'_, Jacobians>> {
        if self.jacobians.borrow().is_none() {
            let built = Jacobians::build(self)?;
            *self.jacobians.borrow_mut() = Some(built);
        }
        Ok(Ref::map(self.jacobians.borrow(), |slot| match slot {
            Some(programs) => programs,
            None => unreachable!("jacobian cache was just filled"),
        }))
    }

    fn eval_matrix(&self, programs: &[Bytecode], rows: usize, cols: usize, x0: &[f64], u0: &[f64]) -> DMatrix<f64> {
        let mut stack = self.stack.borrow_mut();
        let mut values = Vec::with_capacity(rows * cols);
        for program in programs {
            values.push(Vm::execute(program, 0.0, x0, u0, &mut stack));
        }
        DMatrix::from_row_slice(rows, cols, &values)
    }

    /// Linearizes the model about the operating point (x0, u0).
    ///
    /// The symbolic Jacobians A = df/dx, B = df/du, C = dg/dx, D = dg/du are
    /// differentiated and compiled on the first call, then evaluated at
    /// (t = 0, x0, u0) together with the output offset y0 = g(0, x0, u0).
    pub fn linearize(&self, x0: &[f64], u0: &[f64]) -> CoreResult<LinearModel> {
        let n = self.states.len();
        let m = self.inputs.len();
        let p = self.g.len();
        if x0.len() != n {
            return Err(CoreError::DimensionMismatch {
                what: "x0",
                expected: n,
                actual: x0.len(),
            });
        }
        if u0.len() != m {
            return Err(CoreError::DimensionMismatch {
                what: "u0",
                expected: m,
                actual: u0.len(),
            });
        }

        let programs = self.jacobian_programs()?;
        let a = self.eval_matrix(&programs.df_dx, n, n, x0, u0);
        let b = self.eval_matrix(&programs.df_du, n, m, x0, u0);
        let c = self.eval_matrix(&programs.dg_dx, p, n, x0, u0);
        let d = self.eval_matrix(&programs.dg_du, p, m, x0, u0);
        drop(programs);

        let mut y0 = DVector::zeros(p);
        self.eval_into(&self.g_prog, 0.0, x0, u0, y0.as_mut_slice());

        LinearModel::from_matrices(
            self.states.clone(),
            self.inputs.clone(),
            DVector::from_column_slice(x0),
            DVector::from_column_slice(u0),
            y0,
            a,
            b,
            c,
            d,
        )
    }
}

/// A linear state-space model about an operating point:
///
/// f = A (x - x0) + B (u - u0)
/// g = y0 + C (x - x0) + D (u - u0)
///
/// Contains a [`StateSpace`] built from its own affine expressions, so a
/// LinearModel simulates and re-linearizes through the same contracts as
/// any nonlinear model.
#[derive(Debug)]
pub struct LinearModel {
    system: StateSpace,
    x0: DVector<f64>,
    u0: DVector<f64>,
    y0: DVector<f64>,
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    c: DMatrix<f64>,
    d: DMatrix<f64>,
}

impl LinearModel {
    /// Builds the affine model from explicit matrices.
    ///
    /// Shape invariants: A is n x n, B is n x m, C is p x n, D is p x m,
    /// with n = |states|, m = |inputs|, p = |y0|; x0 and u0 must match n
    /// and m. Violations are reported, never coerced.
    #[allow(clippy::too_many_arguments)]
    pub fn from_matrices(
        states: Vec<String>,
        inputs: Vec<String>,
        x0: DVector<f64>,
        u0: DVector<f64>,
        y0: DVector<f64>,
        a: DMatrix<f64>,
        b: DMatrix<f64>,
        c: DMatrix<f64>,
        d: DMatrix<f64>,
    ) -> CoreResult<Self> {
        let n = states.len();
        let m = inputs.len();
        let p = y0.len();
        let expect = |what: &'static str, expected: usize, actual: usize| -> CoreResult<()> {
            if expected != actual {
                return Err(CoreError::DimensionMismatch {
                    what,
                    expected,
                    actual,
                });
            }
            Ok(())
        };
        expect("x0", n, x0.len())?;
        expect("u0", m, u0.len())?;
        expect("rows of A", n, a.nrows())?;
        expect("columns of A", n, a.ncols())?;
        expect("rows of B", n, b.nrows())?;
        expect("columns of B", m, b.ncols())?;
        expect("rows of C", p, c.nrows())?;
        expect("columns of C", n, c.ncols())?;
        expect("rows of D", p, d.nrows())?;
        expect("columns of D", m, d.ncols())?;

        let f = affine_rows(&states, &inputs, &x0, &u0, None, &a, &b);
        let g = affine_rows(&states, &inputs, &x0, &u0, Some(&y0), &c, &d);
        let system = StateSpace::new(states, inputs, f, g)?;

        Ok(Self {
            system,
            x0,
            u0,
            y0,
            a,
            b,
            c,
            d,
        })
    }

    /// The affine [`StateSpace`] backing this model.
    pub fn system(&self) -> &StateSpace {
        &self.system
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }

    pub fn c(&self) -> &DMatrix<f64> {
        &self.c
    }

    pub fn d(&self) -> &DMatrix<f64> {
        &self.d
    }

    pub fn operating_point(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.x0, &self.u0)
    }

    pub fn output_offset(&self) -> &DVector<f64> {
        &self.y0
    }

    /// Simulates the affine system; same contract as
    /// [`StateSpace::simulate`].
    pub fn simulate(
        &self,
        x0: &[f64],
        u0: &[f64],
        dt: f64,
        tf: f64,
        control: Option<ControlLaw<'_>>,
    ) -> CoreResult<Trajectory> {
        self.system.simulate(x0, u0, dt, tf, control)
    }

    /// Same contract as [`StateSpace::simulate_with`].
    pub fn simulate_with(
        &self,
        solver: SolverKind,
        x0: &[f64],
        u0: &[f64],
        dt: f64,
        tf: f64,
        control: Option<ControlLaw<'_>>,
    ) -> CoreResult<Trajectory> {
        self.system.simulate_with(solver, x0, u0, dt, tf, control)
    }

    /// Exports the fixed matrices; a pure data transfer.
    pub fn to_lti(&self) -> LtiSystem {
        LtiSystem {
            a: self.a.clone(),
            b: self.b.clone(),
            c: self.c.clone(),
            d: self.d.clone(),
        }
    }

    /// Rebuilds an affine model from an exported [`LtiSystem`]; the
    /// matrices are moved verbatim, no recomputation.
    pub fn from_lti(
        states: Vec<String>,
        inputs: Vec<String>,
        x0: DVector<f64>,
        u0: DVector<f64>,
        y0: DVector<f64>,
        lti: LtiSystem,
    ) -> CoreResult<Self> {
        Self::from_matrices(states, inputs, x0, u0, y0, lti.a, lti.b, lti.c, lti.d)
    }
}

fn affine_rows(
    states: &[String],
    inputs: &[String],
    x0: &DVector<f64>,
    u0: &DVector<f64>,
    offset: Option<&DVector<f64>>,
    state_matrix: &DMatrix<f64>,
    input_matrix: &DMatrix<f64>,
) -> Vec<Expr> {
    let rows = state_matrix.nrows();
    let mut exprs = Vec::with_capacity(rows);
    for i in 0..rows {
        let mut row = Expr::constant(offset.map_or(0.0, |y0| y0[i]));
        for (j, name) in states.iter().enumerate() {
            let coefficient = state_matrix[(i, j)];
            if coefficient != 0.0 {
                let deviation = Expr::symbol(name.clone()) - Expr::constant(x0[j]);
                row = row + Expr::constant(coefficient) * deviation;
            }
        }
        for (k, name) in inputs.iter().enumerate() {
            let coefficient = input_matrix[(i, k)];
            if coefficient != 0.0 {
                let deviation = Expr::symbol(name.clone()) - Expr::constant(u0[k]);
                row = row + Expr::constant(coefficient) * deviation;
            }
        }
        exprs.push(row.simplify());
    }
    exprs
}

/// Plain fixed-matrix representation for downstream classical-control
/// analysis (pole placement, frequency response, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtiSystem {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
}

impl LtiSystem {
    /// Poles of the system: the complex eigenvalues of A.
    pub fn poles(&self) -> Vec<ComplexNumber> {
        self.a
            .complex_eigenvalues()
            .iter()
            .map(|value| ComplexNumber::from(*value))
            .collect()
    }
}

/// A serializable complex value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn spring_cart() -> LinearModel {
        LinearModel::from_matrices(
            names(&["pos", "vel"]),
            names(&["force"]),
            DVector::from_vec(vec![0.3, -0.2]),
            DVector::from_vec(vec![0.5]),
            DVector::from_vec(vec![0.7]),
            DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -2.0, -3.0]),
            DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DMatrix::from_row_slice(1, 1, &[0.0]),
        )
        .expect("model")
    }

    #[test]
    fn scalar_linearization_at_equilibrium() {
        let model = StateSpace::parse(&["x"], &["u"], &["-x + u"], &["x"]).expect("model");
        let linear = model.linearize(&[1.0], &[1.0]).expect("linearize");
        assert_relative_eq!(linear.a()[(0, 0)], -1.0);
        assert_relative_eq!(linear.b()[(0, 0)], 1.0);
        assert_relative_eq!(linear.c()[(0, 0)], 1.0);
        assert_relative_eq!(linear.d()[(0, 0)], 0.0);
        assert_relative_eq!(linear.output_offset()[0], 1.0);
    }

    #[test]
    fn linearize_recovers_affine_matrices_anywhere() {
        let reference = spring_cart();
        // relinearize the affine system far from its operating point
        let relinearized = reference
            .system()
            .linearize(&[4.0, -7.5], &[2.25])
            .expect("linearize");
        assert_relative_eq!(reference.a(), relinearized.a(), epsilon = 1e-12);
        assert_relative_eq!(reference.b(), relinearized.b(), epsilon = 1e-12);
        assert_relative_eq!(reference.c(), relinearized.c(), epsilon = 1e-12);
        assert_relative_eq!(reference.d(), relinearized.d(), epsilon = 1e-12);
    }

    #[test]
    fn nonlinear_jacobians_match_hand_derivation() {
        // dx/dt = -sin(x) + u^2, y = x * u
        let model = StateSpace::parse(&["x"], &["u"], &["-sin(x) + u^2"], &["x * u"])
            .expect("model");
        let (x0, u0) = (0.6, 1.4);
        let linear = model.linearize(&[x0], &[u0]).expect("linearize");
        assert_relative_eq!(linear.a()[(0, 0)], -x0.cos(), epsilon = 1e-12);
        assert_relative_eq!(linear.b()[(0, 0)], 2.0 * u0, epsilon = 1e-12);
        assert_relative_eq!(linear.c()[(0, 0)], u0, epsilon = 1e-12);
        assert_relative_eq!(linear.d()[(0, 0)], x0, epsilon = 1e-12);
        assert_relative_eq!(linear.output_offset()[0], x0 * u0, epsilon = 1e-12);
    }

    #[test]
    fn linearize_validates_operating_point_first() {
        let model = StateSpace::parse(&["x", "y"], &["u"], &["-x", "-y"], &["x"]).expect("model");
        assert!(matches!(
            model.linearize(&[1.0, 2.0, 3.0], &[0.0]),
            Err(CoreError::DimensionMismatch {
                what: "x0",
                expected: 2,
                actual: 3,
            })
        ));
        assert!(matches!(
            model.linearize(&[1.0, 2.0], &[]),
            Err(CoreError::DimensionMismatch { what: "u0", .. })
        ));
    }

    #[test]
    fn jacobian_cache_is_stable_across_calls() {
        let model = StateSpace::parse(&["x"], &["u"], &["-x * x + u"], &["x"]).expect("model");
        let first = model.linearize(&[2.0], &[4.0]).expect("linearize");
        let second = model.linearize(&[2.0], &[4.0]).expect("linearize");
        assert_eq!(first.a(), second.a());
        assert_relative_eq!(first.a()[(0, 0)], -4.0, epsilon = 1e-12);
    }

    #[test]
    fn from_matrices_rejects_bad_shapes() {
        let result = LinearModel::from_matrices(
            names(&["x", "y"]),
            names(&["u"]),
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![0.0]),
            DVector::from_vec(vec![0.0]),
            DMatrix::from_row_slice(1, 2, &[1.0, 2.0]),
            DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DMatrix::from_row_slice(1, 1, &[0.0]),
        );
        assert!(matches!(
            result,
            Err(CoreError::DimensionMismatch {
                what: "rows of A",
                ..
            })
        ));
    }

    #[test]
    fn lti_round_trip_preserves_matrices_exactly() {
        let model = spring_cart();
        let lti = model.to_lti();
        let rebuilt = LinearModel::from_lti(
            names(&["pos", "vel"]),
            names(&["force"]),
            model.operating_point().0.clone(),
            model.operating_point().1.clone(),
            model.output_offset().clone(),
            lti,
        )
        .expect("rebuild");
        assert_eq!(model.a(), rebuilt.a());
        assert_eq!(model.b(), rebuilt.b());
        assert_eq!(model.c(), rebuilt.c());
        assert_eq!(model.d(), rebuilt.d());
    }

    #[test]
    fn poles_of_diagonal_system() {
        let lti = LtiSystem {
            a: DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -2.0]),
            b: DMatrix::from_row_slice(2, 1, &[1.0, 1.0]),
            c: DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            d: DMatrix::from_row_slice(1, 1, &[0.0]),
        };
        let mut poles = lti.poles();
        poles.sort_by(|lhs, rhs| lhs.re.total_cmp(&rhs.re));
        assert_relative_eq!(poles[0].re, -2.0, epsilon = 1e-12);
        assert_relative_eq!(poles[1].re, -1.0, epsilon = 1e-12);
        assert_relative_eq!(poles[0].im, 0.0, epsilon = 1e-12);
        assert_relative_eq!(poles[1].im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn linear_model_simulates_like_a_state_space() {
        let model = spring_cart();
        let (x0, u0) = model.operating_point();
        let x0 = x0.as_slice().to_vec();
        let u0 = u0.as_slice().to_vec();
        // the operating point is an equilibrium of the affine dynamics
        let data = model.simulate(&x0, &u0, 0.1, 1.0, None).expect("run");
        for i in 0..data.len() {
            assert_relative_eq!(data.states()[(i, 0)], x0[0], epsilon = 1e-12);
            assert_relative_eq!(data.states()[(i, 1)], x0[1], epsilon = 1e-12);
            assert_relative_eq!(data.outputs()[(i, 0)], model.output_offset()[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn affine_expressions_evaluate_consistently() {
        let model = spring_cart();
        let dx = model
            .system()
            .eval_dynamics(0.0, &[1.3, 0.4], &[0.9])
            .expect("dynamics");
        // f = A (x - x0) + B (u - u0)
        assert_relative_eq!(dx[0], 0.4 - (-0.2), epsilon = 1e-12);
        assert_relative_eq!(
            dx[1],
            -2.0 * (1.3 - 0.3) - 3.0 * (0.4 - (-0.2)) + (0.9 - 0.5),
            epsilon = 1e-12
        );
    }
}
