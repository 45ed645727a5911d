//! Model evaluation for the linear, 4PL and Hill families.
//!
//! The fitters rely on three primitive operations:
//! - build a gradient row `∂f/∂θ` at a given x (the Jacobian row for Levenberg–Marquardt)
//! - predict `y(x)` given parameters (for residuals, grids and plots)
//! - invert `y → x` in closed form (for EC50-style read-back)
//!
//! These are implemented here for each model kind.

use crate::domain::{CurveParams, ModelKind};
use crate::error::{FitError, FitResult};

/// Fill the gradient row `∂f/∂θ` for the given model kind and return `f(x; θ)`.
///
/// # Panics
/// Panics if `params` or `out` do not have length `model.param_count()`. Callers
/// size these arrays from the model kind.
pub fn fill_gradient_row(model: ModelKind, x: f64, params: &[f64], out: &mut [f64]) -> f64 {
    match model {
        ModelKind::Linear => {
            out[0] = x;
            out[1] = 1.0;
            params[0] * x + params[1]
        }
        ModelKind::Log2Linear => {
            let lx = x.log2();
            out[0] = lx;
            out[1] = 1.0;
            params[0] * lx + params[1]
        }
        ModelKind::FourPl => {
            let (bottom, slope, mid, top) = (params[0], params[1], params[2], params[3]);
            let ratio = x / mid;
            let u = ratio.powf(slope);
            let span = bottom - top;
            if u.is_infinite() {
                // x = 0 with a negative slope: the curve sits on `top` and every other partial vanishes.
                out[..3].fill(0.0);
                out[3] = 1.0;
                return top;
            }
            let t = 1.0 / (1.0 + u);
            let s = u * t;
            out[0] = t;
            out[1] = if u == 0.0 { 0.0 } else { -span * ratio.ln() * s * t };
            out[2] = span * slope * s * t / mid;
            out[3] = s;
            top + span * t
        }
        ModelKind::Hill => {
            let (bmax, h, kd) = (params[0], params[1], params[2]);
            let ratio = x / kd;
            let u = ratio.powf(h);
            if u.is_infinite() {
                out[0] = 1.0;
                out[1] = 0.0;
                out[2] = 0.0;
                return bmax;
            }
            let t = 1.0 / (1.0 + u);
            let s = u * t;
            out[0] = s;
            out[1] = if u == 0.0 { 0.0 } else { bmax * ratio.ln() * s * t };
            out[2] = -bmax * h * s * t / kd;
            bmax * s
        }
    }
}

/// Predict `y(x)` for the given model kind.
pub fn predict(model: ModelKind, x: f64, params: &[f64]) -> f64 {
    match model {
        ModelKind::Linear => params[0] * x + params[1],
        ModelKind::Log2Linear => params[0] * x.log2() + params[1],
        ModelKind::FourPl => {
            let (bottom, slope, mid, top) = (params[0], params[1], params[2], params[3]);
            top + (bottom - top) / (1.0 + (x / mid).powf(slope))
        }
        ModelKind::Hill => {
            let (bmax, h, kd) = (params[0], params[1], params[2]);
            let u = (x / kd).powf(h);
            if u.is_infinite() { bmax } else { bmax * u / (1.0 + u) }
        }
    }
}

/// Reject x-values the model cannot be evaluated at.
pub fn check_domain(model: ModelKind, x: &[f64]) -> FitResult<()> {
    let bad = match model {
        ModelKind::Linear => None,
        ModelKind::Log2Linear => x.iter().position(|&v| v <= 0.0),
        ModelKind::FourPl | ModelKind::Hill => x.iter().position(|&v| v < 0.0),
    };
    match bad {
        Some(i) => Err(FitError::InvalidInput(format!(
            "{} requires {} x-values (observation {i} is {})",
            model.display_name(),
            if model == ModelKind::Log2Linear { "positive" } else { "non-negative" },
            x[i]
        ))),
        None => Ok(()),
    }
}

/// Closed-form inverse: the x at which the curve reaches `y`.
///
/// Sigmoid families only. Targets outside the open interval between the
/// asymptotes are `OutOfRange`.
pub fn invert(params: &CurveParams, y: f64) -> FitResult<f64> {
    let v = &params.values;
    match params.kind {
        ModelKind::FourPl => invert_four_pl(v[0], v[1], v[2], v[3], y),
        ModelKind::Hill => invert_hill(v[0], v[1], v[2], y),
        ModelKind::Linear => {
            if v[0] == 0.0 {
                return Err(FitError::OutOfRange("flat line cannot be inverted".to_string()));
            }
            Ok((y - v[1]) / v[0])
        }
        ModelKind::Log2Linear => {
            if v[0] == 0.0 {
                return Err(FitError::OutOfRange("flat line cannot be inverted".to_string()));
            }
            let x = ((y - v[1]) / v[0]).exp2();
            if x.is_finite() {
                Ok(x)
            } else {
                Err(FitError::OutOfRange(format!("y={y} maps outside the representable range")))
            }
        }
    }
}

/// `x = midpoint · ((y − bottom) / (top − y))^(1/slope)`.
pub fn invert_four_pl(bottom: f64, slope: f64, midpoint: f64, top: f64, y: f64) -> FitResult<f64> {
    if midpoint == 0.0 {
        return Err(FitError::FitDivergence("4PL midpoint is zero".to_string()));
    }
    if slope == 0.0 {
        return Err(FitError::OutOfRange("4PL with zero slope is flat".to_string()));
    }
    let ratio = (y - bottom) / (top - y);
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(FitError::OutOfRange(format!(
            "y={y} is outside the open interval between asymptotes {bottom} and {top}"
        )));
    }
    let x = midpoint * ratio.powf(1.0 / slope);
    if x.is_finite() {
        Ok(x)
    } else {
        Err(FitError::OutOfRange(format!("y={y} maps outside the representable range")))
    }
}

/// `x = kd · (y / (bmax − y))^(1/h)`.
pub fn invert_hill(bmax: f64, h: f64, kd: f64, y: f64) -> FitResult<f64> {
    if kd == 0.0 {
        return Err(FitError::FitDivergence("Hill kd is zero".to_string()));
    }
    if h == 0.0 {
        return Err(FitError::OutOfRange("Hill curve with zero slope is flat".to_string()));
    }
    let ratio = y / (bmax - y);
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(FitError::OutOfRange(format!(
            "y={y} is outside the open interval (0, {bmax})"
        )));
    }
    let x = kd * ratio.powf(1.0 / h);
    if x.is_finite() {
        Ok(x)
    } else {
        Err(FitError::OutOfRange(format!("y={y} maps outside the representable range")))
    }
}

/// Half-maximal concentration (4PL midpoint or Hill kd) and its log10.
pub fn ec50(params: &CurveParams) -> Option<(f64, f64)> {
    let c = match params.kind {
        ModelKind::FourPl => params.values[2],
        ModelKind::Hill => params.values[2],
        ModelKind::Linear | ModelKind::Log2Linear => return None,
    };
    Some((c, c.log10()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn four_pl(bottom: f64, slope: f64, mid: f64, top: f64) -> CurveParams {
        CurveParams::new(ModelKind::FourPl, vec![bottom, slope, mid, top]).unwrap()
    }

    #[test]
    fn four_pl_midpoint_is_halfway() {
        let p = four_pl(0.1, 1.3, 50.0, 2.0);
        assert!((p.evaluate(50.0) - 1.05).abs() < 1e-12);
        assert_eq!(four_pl(0.0, 1.0, 10.0, 100.0).evaluate(10.0), 50.0);
    }

    #[test]
    fn four_pl_round_trip() {
        for &(bottom, slope, mid, top) in &[
            (0.0, 1.0, 10.0, 1.0),
            (0.05, 2.5, 3.0, 1.8),
            (-1.0, -0.7, 120.0, 4.0),
            (0.2, 0.4, 0.01, 0.9),
        ] {
            let p = four_pl(bottom, slope, mid, top);
            for &x in &[0.001, 0.5, 3.0, 42.0, 900.0] {
                let y = p.evaluate(x);
                match invert(&p, y) {
                    Ok(back) => assert!((back - x).abs() <= 1e-6 * x.max(1.0), "x={x} back={back}"),
                    // Saturated ends collapse onto an asymptote in f64.
                    Err(e) => assert_eq!(e.kind(), ErrorKind::OutOfRange),
                }
            }
        }
    }

    #[test]
    fn four_pl_inversion_out_of_range() {
        let p = four_pl(0.0, 1.0, 10.0, 1.0);
        assert_eq!(invert(&p, 1.5).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(invert(&p, 0.0).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(invert(&p, 1.0).unwrap_err().kind(), ErrorKind::OutOfRange);

        let flat = four_pl(1.0, 1.0, 10.0, 1.0);
        assert_eq!(invert(&flat, 1.0).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(
            invert_four_pl(0.0, 0.0, 10.0, 1.0, 0.5).unwrap_err().kind(),
            ErrorKind::OutOfRange
        );
    }

    #[test]
    fn hill_round_trip_and_half_max() {
        let p = CurveParams::new(ModelKind::Hill, vec![3.0, 1.5, 20.0]).unwrap();
        assert!((p.evaluate(20.0) - 1.5).abs() < 1e-12);
        let y = p.evaluate(7.0);
        assert!((invert(&p, y).unwrap() - 7.0).abs() < 1e-9);
        assert_eq!(invert(&p, 3.5).unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let cases = [
            (ModelKind::FourPl, vec![0.2, 1.4, 12.0, 2.1], 5.0),
            (ModelKind::Hill, vec![2.0, 0.8, 3.0], 4.5),
            (ModelKind::Log2Linear, vec![2.0, 1.0], 8.0),
        ];
        for (kind, params, x) in cases {
            let mut grad = vec![0.0; kind.param_count()];
            let f = fill_gradient_row(kind, x, &params, &mut grad);
            assert!((f - predict(kind, x, &params)).abs() < 1e-12);
            for j in 0..params.len() {
                let h = 1e-6 * params[j].abs().max(1.0);
                let mut up = params.clone();
                up[j] += h;
                let mut down = params.clone();
                down[j] -= h;
                let fd = (predict(kind, x, &up) - predict(kind, x, &down)) / (2.0 * h);
                assert!((fd - grad[j]).abs() < 1e-6, "{kind:?} param {j}: fd={fd} grad={}", grad[j]);
            }
        }
    }

    #[test]
    fn gradient_at_zero_dose_with_negative_slope_is_finite() {
        let mut grad = vec![f64::NAN; 4];
        let f = fill_gradient_row(ModelKind::FourPl, 0.0, &[0.1, -1.2, 4.0, 2.0], &mut grad);
        assert_eq!(f, 2.0);
        assert_eq!(grad, vec![0.0, 0.0, 0.0, 1.0]);

        let mut grad = vec![f64::NAN; 4];
        let f = fill_gradient_row(ModelKind::FourPl, 0.0, &[0.1, 1.2, 4.0, 2.0], &mut grad);
        assert_eq!(f, 0.1);
        assert!(grad.iter().all(|g| g.is_finite()));

        let mut grad = vec![f64::NAN; 3];
        let f = fill_gradient_row(ModelKind::Hill, 0.0, &[3.0, -0.8, 2.0], &mut grad);
        assert_eq!(f, 3.0);
        assert_eq!(grad, vec![1.0, 0.0, 0.0]);
        assert_eq!(predict(ModelKind::Hill, 0.0, &[3.0, -0.8, 2.0]), 3.0);
    }

    #[test]
    fn log2_linear_requires_positive_x() {
        let err = check_domain(ModelKind::Log2Linear, &[1.0, 0.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(check_domain(ModelKind::FourPl, &[0.0, 1.0]).is_ok());
    }
}
