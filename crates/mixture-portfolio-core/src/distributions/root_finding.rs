//! Bracketing scalar root finders.
//!
//! Every solver here requires `f(lower)` and `f(upper)` to differ in sign and
//! reports a [`PortfolioError::RootBracketing`] otherwise. No solver widens
//! the bracket on its own.

use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Absolute x-tolerance used when callers do not supply one.
pub const DEFAULT_XTOL: f64 = 2e-12;

/// Relative x-tolerance (4 machine epsilons).
const RTOL: f64 = 4.0 * f64::EPSILON;

/// Maximum iterations before a [`PortfolioError::ConvergenceFailure`].
pub const MAX_ROOT_ITERATIONS: u32 = 100;

/// A scalar root finder over a sign-changing bracket.
pub trait RootFinder: Send + Sync {
    /// Find `x` in `[lower, upper]` with `f(x) = 0` to within `xtol`.
    ///
    /// `target` is carried only for error reporting (the quantile being
    /// inverted when the finder is used by a mixture marginal).
    fn solve(
        &self,
        f: &dyn Fn(f64) -> f64,
        lower: f64,
        upper: f64,
        xtol: f64,
        target: f64,
    ) -> PortfolioResult<f64>;
}

fn check_bracket(
    f_lower: f64,
    f_upper: f64,
    lower: f64,
    upper: f64,
    target: f64,
) -> PortfolioResult<()> {
    if !f_lower.is_finite() || !f_upper.is_finite() || f_lower * f_upper > 0.0 {
        return Err(PortfolioError::RootBracketing {
            quantile: target,
            lower,
            upper,
            f_lower,
            f_upper,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Brent
// ---------------------------------------------------------------------------

/// Brent's method: inverse quadratic interpolation and secant steps
/// safeguarded by bisection.
#[derive(Debug, Clone, Copy)]
pub struct Brent {
    pub max_iterations: u32,
}

impl Default for Brent {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ROOT_ITERATIONS,
        }
    }
}

impl RootFinder for Brent {
    fn solve(
        &self,
        f: &dyn Fn(f64) -> f64,
        lower: f64,
        upper: f64,
        xtol: f64,
        target: f64,
    ) -> PortfolioResult<f64> {
        let mut a = lower;
        let mut b = upper;
        let mut fa = f(a);
        let mut fb = f(b);
        check_bracket(fa, fb, lower, upper, target)?;

        if fa == 0.0 {
            return Ok(a);
        }
        if fb == 0.0 {
            return Ok(b);
        }

        // `c` is the previous contrapoint; `d`/`e` are the last two steps.
        let mut c = a;
        let mut fc = fa;
        let mut d = b - a;
        let mut e = d;

        for _ in 0..self.max_iterations {
            if fb * fc > 0.0 {
                c = a;
                fc = fa;
                d = b - a;
                e = d;
            }
            if fc.abs() < fb.abs() {
                a = b;
                b = c;
                c = a;
                fa = fb;
                fb = fc;
                fc = fa;
            }

            let tol = 2.0 * RTOL * b.abs() + 0.5 * xtol;
            let m = 0.5 * (c - b);

            if m.abs() <= tol || fb == 0.0 {
                return Ok(b);
            }

            if e.abs() >= tol && fa.abs() > fb.abs() {
                let s = fb / fa;
                let (mut p, mut q) = if a == c {
                    (2.0 * m * s, 1.0 - s)
                } else {
                    let q0 = fa / fc;
                    let r = fb / fc;
                    (
                        s * (2.0 * m * q0 * (q0 - r) - (b - a) * (r - 1.0)),
                        (q0 - 1.0) * (r - 1.0) * (s - 1.0),
                    )
                };
                if p > 0.0 {
                    q = -q;
                } else {
                    p = -p;
                }
                if 2.0 * p < (3.0 * m * q - (tol * q).abs()).min((e * q).abs()) {
                    e = d;
                    d = p / q;
                } else {
                    d = m;
                    e = m;
                }
            } else {
                d = m;
                e = m;
            }

            a = b;
            fa = fb;
            b += if d.abs() > tol { d } else { tol.copysign(m) };
            fb = f(b);
        }

        Err(PortfolioError::ConvergenceFailure {
            function: "Brent root finder".into(),
            iterations: self.max_iterations,
            last_delta: fb,
        })
    }
}

// ---------------------------------------------------------------------------
// Bisection
// ---------------------------------------------------------------------------

/// Plain bisection. Slower than [`Brent`] but immune to pathological
/// interpolation steps.
#[derive(Debug, Clone, Copy)]
pub struct Bisection {
    pub max_iterations: u32,
}

impl Default for Bisection {
    fn default() -> Self {
        Self {
            max_iterations: 200,
        }
    }
}

impl RootFinder for Bisection {
    fn solve(
        &self,
        f: &dyn Fn(f64) -> f64,
        lower: f64,
        upper: f64,
        xtol: f64,
        target: f64,
    ) -> PortfolioResult<f64> {
        let mut lo = lower;
        let mut hi = upper;
        let mut f_lo = f(lo);
        let f_hi = f(hi);
        check_bracket(f_lo, f_hi, lower, upper, target)?;

        if f_lo == 0.0 {
            return Ok(lo);
        }
        if f_hi == 0.0 {
            return Ok(hi);
        }

        for _ in 0..self.max_iterations {
            let mid = 0.5 * (lo + hi);
            let f_mid = f(mid);
            if f_mid == 0.0 || 0.5 * (hi - lo) <= xtol {
                return Ok(mid);
            }
            if f_lo * f_mid < 0.0 {
                hi = mid;
            } else {
                lo = mid;
                f_lo = f_mid;
            }
        }

        Err(PortfolioError::ConvergenceFailure {
            function: "Bisection root finder".into(),
            iterations: self.max_iterations,
            last_delta: hi - lo,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
