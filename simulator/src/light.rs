//! Light yields of the developing shower.
//!
//! Fluorescence follows the effective ionization loss rate: the energy
//! a shower electron deposits per unit slant depth, divided by the mean
//! deposit per emitted photon. Cherenkov production integrates a
//! Nerling-shaped electron energy spectrum against the per-electron
//! photon yield above the local threshold energy. All coefficients come
//! from [`PhysicsConfig`], so either parameterization can be retuned
//! without touching the simulator.

use shared::config::PhysicsConfig;

/// Electron rest energy (MeV).
const ELECTRON_MASS: f64 = 0.510_998_95;

/// Number of points in the electron energy grid.
const ENERGY_GRID: usize = 64;

/// Effective ionization loss rate α_eff(s) in MeV per g/cm².
pub fn ionization_loss_rate(age: f64, physics: &PhysicsConfig) -> f64 {
    let [c1, c2, c3, c4, c5] = physics.fluor_coeff;
    c1 / (c2 + age).powf(c3) + c4 + c5 * age
}

/// Fluorescence photons emitted over one depth step by `n_e` electrons.
pub fn fluorescence_photons(n_e: f64, depth_step: f64, age: f64, physics: &PhysicsConfig) -> f64 {
    ionization_loss_rate(age, physics) * depth_step / physics.fluor_photon_energy * n_e
}

/// Cherenkov threshold energy (MeV) at local refractivity `delta`.
pub fn cherenkov_threshold(delta: f64) -> f64 {
    ELECTRON_MASS / (2.0 * delta).sqrt()
}

/// Critical angle of the Cherenkov angular distribution (rad).
pub fn cherenkov_critical_angle(e_threshold: f64, physics: &PhysicsConfig) -> f64 {
    physics.chkv_theta_k1 * e_threshold.powf(physics.chkv_theta_k2)
}

/// Cherenkov photons emitted over one depth step by `n_e` electrons at
/// local refractivity `delta` and density `rho`.
///
/// The electron spectrum weight is `E / ((E + a1)(E + a2)^s)` with
/// age-dependent a1, a2; the per-electron yield above threshold is
/// `chkv_yield · δ · (1 − (E_thr/E)²) / ρ` photons per g/cm². The
/// spectrum is normalized on the grid, so only its shape matters.
pub fn cherenkov_photons(
    n_e: f64,
    depth_step: f64,
    age: f64,
    delta: f64,
    rho: f64,
    physics: &PhysicsConfig,
) -> f64 {
    let e_threshold = cherenkov_threshold(delta);
    if e_threshold >= physics.chkv_energy_max {
        return 0.0;
    }
    let a1 = (physics.chkv_a1_base + physics.chkv_a1_slope * age).max(1e-3);
    let a2 = (physics.chkv_a2_base + physics.chkv_a2_slope * age).max(1e-3);

    // Log-spaced grid from well below threshold to the configured
    // maximum; sub-threshold electrons carry spectrum weight but yield
    // no light.
    let e_lo = (e_threshold / 10.0).max(0.1);
    let log_lo = e_lo.ln();
    let log_hi = physics.chkv_energy_max.ln();
    let step = (log_hi - log_lo) / (ENERGY_GRID - 1) as f64;

    let mut weight_sum = 0.0;
    let mut yield_sum = 0.0;
    for i in 0..ENERGY_GRID {
        let energy = (log_lo + step * i as f64).exp();
        // Trapezoid measure on the log grid: dE = E d(lnE).
        let weight = energy * energy / ((energy + a1) * (energy + a2).powf(age));
        weight_sum += weight;
        if energy > e_threshold {
            let ratio = e_threshold / energy;
            yield_sum += weight * physics.chkv_yield * delta * (1.0 - ratio * ratio) / rho;
        }
    }
    if weight_sum <= 0.0 {
        return 0.0;
    }
    n_e * depth_step * yield_sum / weight_sum
}
