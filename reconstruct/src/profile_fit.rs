//! Time-profile geometry fit.
//!
//! Each pixel with signal contributes a data point: its in-plane
//! viewing angle χ (measured in the shower-detector plane from the
//! horizontal reference axis) and its count-weighted mean arrival
//! time. The shower geometry predicts
//!
//! `t(χ) = t₀ + (Rp/c) · tan((π − ψ − χ)/2)`
//!
//! where `t₀` is the time the front passes closest approach, `Rp` the
//! impact parameter, and `ψ` the angle of the axis in the plane. The
//! three (or, with a ground impact constraint, two) parameters are fit
//! by Levenberg-Marquardt on the damped normal equations.

use nalgebra::{Matrix2, Matrix3, Rotation3, Vector2, Vector3};

use shared::geometry::LIGHT_SPEED;
use shared::photon_count::PhotonCount;

/// Internal parameter scales keeping the normal equations conditioned:
/// times are fit in units of 10 µs, distances in units of 10 km.
const TIME_SCALE: f64 = 1.0e-5;
const LENGTH_SCALE: f64 = 1.0e6;

/// Levenberg-Marquardt knobs.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Maximum iterations before giving up.
    pub max_iterations: usize,
    /// Initial damping.
    pub initial_lambda: f64,
    /// Factor applied to lambda on a rejected step.
    pub lambda_up: f64,
    /// Factor applied to lambda on an accepted step.
    pub lambda_down: f64,
    /// Relative chi² improvement considered converged.
    pub convergence_threshold: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            initial_lambda: 1.0e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            convergence_threshold: 1.0e-9,
        }
    }
}

/// Fitted time-profile parameters.
#[derive(Debug, Clone, Copy)]
pub struct FitSummary {
    /// Time the shower front passes the point of closest approach (s).
    pub t0: f64,
    /// Impact parameter (cm).
    pub rp: f64,
    /// Angle of the shower axis within the SDP (rad).
    pub psi: f64,
    /// Weighted chi² of the accepted parameters.
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

impl FitSummary {
    /// The failed-fit sentinel: `rp ≤ 0`.
    pub fn invalid() -> Self {
        Self {
            t0: 0.0,
            rp: -1.0,
            psi: 0.0,
            chi2: f64::INFINITY,
            converged: false,
            iterations: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.converged && self.rp > 0.0
    }
}

/// One pixel's contribution to the fit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FitPoint {
    pub chi: f64,
    pub t: f64,
    pub sigma: f64,
}

fn model(chi: f64, t0: f64, rp: f64, psi: f64) -> f64 {
    let u = half_angle(chi, psi);
    t0 + rp / LIGHT_SPEED * u.tan()
}

fn half_angle(chi: f64, psi: f64) -> f64 {
    let limit = std::f64::consts::FRAC_PI_2 - 1.0e-6;
    ((std::f64::consts::PI - psi - chi) / 2.0).clamp(-limit, limit)
}

fn chi2_of(points: &[FitPoint], t0: f64, rp: f64, psi: f64) -> f64 {
    points
        .iter()
        .map(|p| {
            let r = (p.t - model(p.chi, t0, rp, psi)) / p.sigma;
            r * r
        })
        .sum()
}

/// Weighted least-squares slope of t against χ, for the initial guess
/// and for orienting the plane frame.
fn weighted_slope(points: &[(f64, f64, f64)]) -> f64 {
    let mut w_sum = 0.0;
    let mut chi_mean = 0.0;
    let mut t_mean = 0.0;
    for &(chi, t, w) in points {
        w_sum += w;
        chi_mean += w * chi;
        t_mean += w * t;
    }
    if w_sum == 0.0 {
        return 0.0;
    }
    chi_mean /= w_sum;
    t_mean /= w_sum;
    let mut num = 0.0;
    let mut den = 0.0;
    for &(chi, t, w) in points {
        num += w * (chi - chi_mean) * (t - t_mean);
        den += w * (chi - chi_mean) * (chi - chi_mean);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Re-orient a plane rotation so arrival time decreases with the
/// in-plane angle χ, as the tangent model expects: when the slope
/// comes out positive, the x-axis and normal are both flipped
/// (preserving handedness and the upward y-axis).
pub(crate) fn orient_to_shower(data: &PhotonCount, to_plane: &Rotation3<f64>) -> Rotation3<f64> {
    let weighted: Vec<(f64, f64, f64)> = collect_fit_points(data, to_plane)
        .iter()
        .map(|p| (p.chi, p.t, 1.0 / (p.sigma * p.sigma)))
        .collect();
    if weighted_slope(&weighted) <= 0.0 {
        return *to_plane;
    }
    let m = to_plane.matrix();
    Rotation3::from_matrix_unchecked(nalgebra::Matrix3::from_rows(&[
        -m.row(0),
        m.row(1).into_owned(),
        -m.row(2),
    ]))
}

/// Extract (χ, t, σ) points from the cleaned cube, projected into the
/// plane frame: χ is the in-plane angle from the x-axis, t the
/// count-weighted mean arrival time, σ its statistical error.
pub(crate) fn collect_fit_points(data: &PhotonCount, to_plane: &Rotation3<f64>) -> Vec<FitPoint> {
    let bin = data.params().bin_width;
    let mut raw = Vec::new();
    let mut iter = data.iterator();
    while iter.next() {
        let series = data.counts(iter.x(), iter.y());
        let sum: i64 = series.iter().sum();
        if sum <= 0 {
            continue;
        }
        let weight = sum as f64;
        let mean: f64 = series
            .iter()
            .enumerate()
            .map(|(i, &c)| data.bin_time(i) * c as f64)
            .sum::<f64>()
            / weight;
        let var: f64 = series
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let d = data.bin_time(i) - mean;
                d * d * c as f64
            })
            .sum::<f64>()
            / weight;
        let sigma = ((var + bin * bin / 12.0) / weight).sqrt();
        let in_plane = to_plane * data.direction(&iter);
        raw.push(FitPoint {
            chi: in_plane.y.atan2(in_plane.x),
            t: mean,
            sigma,
        });
    }
    raw
}

/// Slope-based starting point shared by both fits.
fn initial_guess(points: &[FitPoint]) -> (f64, f64, f64) {
    let weighted: Vec<(f64, f64, f64)> = points
        .iter()
        .map(|p| (p.chi, p.t, 1.0 / (p.sigma * p.sigma)))
        .collect();
    let slope = weighted_slope(&weighted);
    let rp = (LIGHT_SPEED * slope.abs()).clamp(1.0e4, 1.0e8);
    let psi = std::f64::consts::FRAC_PI_2;
    let (chi_mean, t_mean) = {
        let mut w_sum = 0.0;
        let mut chi = 0.0;
        let mut t = 0.0;
        for p in points {
            let w = 1.0 / (p.sigma * p.sigma);
            w_sum += w;
            chi += w * p.chi;
            t += w * p.t;
        }
        (chi / w_sum, t / w_sum)
    };
    let t0 = t_mean - rp / LIGHT_SPEED * half_angle(chi_mean, psi).tan();
    (t0, rp, psi)
}

/// Monocular three-parameter fit of `(t₀, Rp, ψ)`.
pub(crate) fn monocular_fit(points: &[FitPoint], config: &FitConfig) -> FitSummary {
    if points.len() < 4 {
        return FitSummary::invalid();
    }
    let (t0, rp, psi) = initial_guess(points);
    let mut params = [t0 / TIME_SCALE, rp / LENGTH_SCALE, psi];
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = chi2_of(points, t0, rp, psi);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;
        let (t0, rp, psi) = unscale(&params);

        let mut hessian = Matrix3::zeros();
        let mut gradient = Vector3::zeros();
        for p in points {
            let u = half_angle(p.chi, psi);
            let sec_sq = 1.0 / (u.cos() * u.cos());
            let jac = Vector3::new(
                TIME_SCALE / p.sigma,
                LENGTH_SCALE * u.tan() / LIGHT_SPEED / p.sigma,
                -rp / (2.0 * LIGHT_SPEED) * sec_sq / p.sigma,
            );
            let residual = (p.t - model(p.chi, t0, rp, psi)) / p.sigma;
            hessian += jac * jac.transpose();
            gradient += jac * residual;
        }
        for i in 0..3 {
            hessian[(i, i)] *= 1.0 + lambda;
        }
        let Some(delta) = hessian.lu().solve(&gradient) else {
            break;
        };

        let mut next = params;
        for (p, d) in next.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        next[1] = next[1].max(1.0 / LENGTH_SCALE);
        next[2] = next[2].clamp(1.0e-3, std::f64::consts::PI - 1.0e-3);

        let (nt0, nrp, npsi) = unscale(&next);
        let next_chi2 = chi2_of(points, nt0, nrp, npsi);
        if next_chi2 < prev_chi2 {
            let improvement = prev_chi2 - next_chi2;
            params = next;
            prev_chi2 = next_chi2;
            lambda *= config.lambda_down;
            if improvement < config.convergence_threshold * (next_chi2 + 1.0) {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1.0e10 {
                break;
            }
        }
    }

    let (t0, rp, psi) = unscale(&params);
    FitSummary {
        t0,
        rp,
        psi,
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

fn unscale(params: &[f64; 3]) -> (f64, f64, f64) {
    (params[0] * TIME_SCALE, params[1] * LENGTH_SCALE, params[2])
}

/// Impact parameter of the axis with in-plane angle ψ constrained to
/// pass through the in-plane impact point.
fn constrained_rp(impact: &Vector2<f64>, psi: f64) -> f64 {
    (impact.x * psi.sin() + impact.y * psi.cos()).abs()
}

/// Hybrid two-parameter fit of `(t₀, ψ)` with `Rp` tied to a measured
/// ground impact point (given in plane-frame coordinates).
pub(crate) fn hybrid_fit(
    points: &[FitPoint],
    impact: &Vector2<f64>,
    config: &FitConfig,
) -> FitSummary {
    if points.len() < 3 {
        return FitSummary::invalid();
    }
    let (t0_init, _, psi_init) = initial_guess(points);
    let mut params = [t0_init / TIME_SCALE, psi_init];
    let mut lambda = config.initial_lambda;
    let model_h = |chi: f64, t0: f64, psi: f64| model(chi, t0, constrained_rp(impact, psi), psi);
    let chi2_h = |t0: f64, psi: f64| {
        points
            .iter()
            .map(|p| {
                let r = (p.t - model_h(p.chi, t0, psi)) / p.sigma;
                r * r
            })
            .sum::<f64>()
    };
    let mut prev_chi2 = chi2_h(t0_init, psi_init);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;
        let t0 = params[0] * TIME_SCALE;
        let psi = params[1];

        let mut hessian = Matrix2::zeros();
        let mut gradient = Vector2::zeros();
        let d_psi = 1.0e-6;
        for p in points {
            let dm_dpsi =
                (model_h(p.chi, t0, psi + d_psi) - model_h(p.chi, t0, psi - d_psi)) / (2.0 * d_psi);
            let jac = Vector2::new(TIME_SCALE / p.sigma, dm_dpsi / p.sigma);
            let residual = (p.t - model_h(p.chi, t0, psi)) / p.sigma;
            hessian += jac * jac.transpose();
            gradient += jac * residual;
        }
        for i in 0..2 {
            hessian[(i, i)] *= 1.0 + lambda;
        }
        let Some(delta) = hessian.lu().solve(&gradient) else {
            break;
        };

        let mut next = params;
        next[0] += delta[0];
        next[1] = (next[1] + delta[1]).clamp(1.0e-3, std::f64::consts::PI - 1.0e-3);

        let next_chi2 = chi2_h(next[0] * TIME_SCALE, next[1]);
        if next_chi2 < prev_chi2 {
            let improvement = prev_chi2 - next_chi2;
            params = next;
            prev_chi2 = next_chi2;
            lambda *= config.lambda_down;
            if improvement < config.convergence_threshold * (next_chi2 + 1.0) {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1.0e10 {
                break;
            }
        }
    }

    let t0 = params[0] * TIME_SCALE;
    let psi = params[1];
    FitSummary {
        t0,
        rp: constrained_rp(impact, psi),
        psi,
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn synthetic_points(t0: f64, rp: f64, psi: f64, n: usize) -> Vec<FitPoint> {
        (0..n)
            .map(|i| {
                let chi = 0.05 + 1.1 * i as f64 / n as f64;
                FitPoint {
                    chi,
                    t: model(chi, t0, rp, psi),
                    sigma: 1.0e-8,
                }
            })
            .collect()
    }

    #[test]
    fn test_monocular_recovers_exact_points() {
        let points = synthetic_points(1.2e-5, 8.0e5, 1.2, 40);
        let fit = monocular_fit(&points, &FitConfig::default());
        assert!(fit.converged, "did not converge: {fit:?}");
        assert_relative_eq!(fit.rp, 8.0e5, max_relative = 1.0e-3);
        assert_relative_eq!(fit.psi, 1.2, max_relative = 1.0e-3);
        assert_relative_eq!(fit.t0, 1.2e-5, epsilon = 1.0e-8);
    }

    #[test]
    fn test_monocular_straight_down_geometry() {
        // ψ = π/2: the closest approach is seen at χ = π/2.
        let points = synthetic_points(0.0, 1.0e6, std::f64::consts::FRAC_PI_2, 30);
        let fit = monocular_fit(&points, &FitConfig::default());
        assert!(fit.converged);
        assert_relative_eq!(fit.rp, 1.0e6, max_relative = 1.0e-3);
        assert_relative_eq!(fit.psi, std::f64::consts::FRAC_PI_2, epsilon = 1.0e-3);
    }

    #[test]
    fn test_too_few_points_invalid() {
        let points = synthetic_points(0.0, 1.0e6, 1.0, 3);
        assert!(!monocular_fit(&points, &FitConfig::default()).is_valid());
    }

    #[test]
    fn test_hybrid_recovers_with_impact_constraint() {
        let (t0, rp, psi) = (5.0e-6, 7.0e5, 1.3);
        let points = synthetic_points(t0, rp, psi, 30);
        // Any point on the axis line works as the measured impact.
        let ca = Vector2::new(rp * psi.sin(), rp * psi.cos());
        let along = Vector2::new(psi.cos(), -psi.sin());
        let impact = ca + along * 3.0e5;
        assert_relative_eq!(constrained_rp(&impact, psi), rp, max_relative = 1.0e-12);

        let fit = hybrid_fit(&points, &impact, &FitConfig::default());
        assert!(fit.converged, "did not converge: {fit:?}");
        assert_relative_eq!(fit.psi, psi, epsilon = 1.0e-3);
        assert_relative_eq!(fit.rp, rp, max_relative = 1.0e-3);
        assert_relative_eq!(fit.t0, t0, epsilon = 1.0e-8);
    }

    #[test]
    fn test_invalid_sentinel_rp_nonpositive() {
        assert!(FitSummary::invalid().rp <= 0.0);
        assert!(!FitSummary::invalid().is_valid());
    }
}
