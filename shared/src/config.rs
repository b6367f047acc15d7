//! Pipeline configuration.
//!
//! Plain-data parameter structs consumed by the Monte Carlo generator,
//! the simulator, and the reconstructor. The structs serialize with
//! serde so a harness can load them from whatever format it prefers;
//! the core only defines the shape, the defaults, and the validation.
//!
//! Units are cgs: lengths in cm, times in s, angles in radians, depths
//! in g/cm². Primary energies are in eV, electron energies in MeV.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Plane;
use nalgebra::Vector3;

/// Configuration validation failure. Construction of any pipeline
/// component surfaces this immediately; the core is unusable until the
/// configuration is fixed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A parameter that must be strictly positive was not.
    #[error("{key} must be positive, got {value}")]
    NotPositive { key: &'static str, value: f64 },

    /// A parameter fell outside its allowed interval.
    #[error("{key} = {value} outside [{lo}, {hi}]")]
    OutOfRange {
        key: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },

    /// A range whose lower bound is not below its upper bound.
    #[error("{key} range is empty: {lo} >= {hi}")]
    EmptyRange { key: &'static str, lo: f64, hi: f64 },

    /// A count parameter that is too small to be meaningful.
    #[error("{key} must be at least {min}, got {value}")]
    CountTooSmall {
        key: &'static str,
        value: usize,
        min: usize,
    },
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { key, value })
    }
}

fn within(key: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { key, value, lo, hi })
    }
}

/// How the ground treats an arriving Cherenkov photon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroundReflection {
    /// Diffuse reflection with a cosine-weighted lobe about the ground
    /// normal.
    Lambertian,
    /// Mirror reflection about the ground normal.
    Specular,
}

/// Detector geometry and optical efficiencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Radius of curvature of the spherical primary mirror (cm).
    pub mirror_radius: f64,
    /// Diameter of the aperture stop at the corrector plate (cm).
    pub stop_diameter: f64,
    /// Diameter of the physical mirror disk (cm).
    pub mainmirr_size: f64,
    /// Diameter of the photomultiplier cluster at the focal surface (cm).
    pub pmtclust_size: f64,
    /// Number of photomultipliers across the camera diameter.
    pub n_pmt_across: usize,
    /// Angle subtended by one photomultiplier (rad).
    pub pmt_angular_size: f64,
    /// Side length of one photomultiplier (cm).
    pub pmt_linear_size: f64,
    /// Elevation of the optical axis above the horizon (rad).
    pub elevation_angle: f64,
    /// Detector altitude above sea level (cm); feeds the atmosphere.
    pub detector_altitude: f64,
    /// Photomultiplier quantum efficiency.
    pub quantum_eff: f64,
    /// Mirror reflectance.
    pub mirror_reflect: f64,
    /// Filter transmittance.
    pub filter_transmit: f64,
    /// Scale factor on the Schmidt corrector's r³ angular kick.
    pub corrector_strength: f64,
    /// Reject rays that strike the back of the camera on their way to
    /// the mirror; when false they pass through and are only counted.
    pub check_back_collision: bool,
    /// Ground reflection model for Cherenkov light.
    pub ground_reflection: GroundReflection,
    /// Ground plane normal, world frame.
    pub ground_normal: [f64; 3],
    /// A point on the ground plane, world frame (cm).
    pub ground_point: [f64; 3],
}

impl DetectorConfig {
    /// Ground plane as a geometric object.
    pub fn ground_plane(&self) -> Plane {
        Plane::new(
            Vector3::from_column_slice(&self.ground_normal),
            Vector3::from_column_slice(&self.ground_point),
        )
    }

    /// Product of quantum efficiency, mirror reflectance, and filter
    /// transmittance.
    pub fn detector_efficiency(&self) -> f64 {
        self.quantum_eff * self.mirror_reflect * self.filter_transmit
    }

    /// Aperture stop area (cm²).
    pub fn stop_area(&self) -> f64 {
        let r = self.stop_diameter / 2.0;
        std::f64::consts::PI * r * r
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive("mirror_radius", self.mirror_radius)?;
        positive("stop_diameter", self.stop_diameter)?;
        positive("mainmirr_size", self.mainmirr_size)?;
        positive("pmtclust_size", self.pmtclust_size)?;
        positive("pmt_angular_size", self.pmt_angular_size)?;
        positive("pmt_linear_size", self.pmt_linear_size)?;
        if self.n_pmt_across < 2 {
            return Err(ConfigError::CountTooSmall {
                key: "n_pmt_across",
                value: self.n_pmt_across,
                min: 2,
            });
        }
        within(
            "elevation_angle",
            self.elevation_angle,
            0.0,
            std::f64::consts::FRAC_PI_2,
        )?;
        within("quantum_eff", self.quantum_eff, 0.0, 1.0)?;
        within("mirror_reflect", self.mirror_reflect, 0.0, 1.0)?;
        within("filter_transmit", self.filter_transmit, 0.0, 1.0)?;
        if self.stop_diameter >= self.mainmirr_size {
            return Err(ConfigError::OutOfRange {
                key: "stop_diameter",
                value: self.stop_diameter,
                lo: 0.0,
                hi: self.mainmirr_size,
            });
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mirror_radius: 600.0,
            stop_diameter: 200.0,
            mainmirr_size: 500.0,
            pmtclust_size: 130.0,
            n_pmt_across: 50,
            pmt_angular_size: 0.008,
            pmt_linear_size: 2.4,
            elevation_angle: 0.05,
            detector_altitude: 1.5e5,
            quantum_eff: 0.85,
            mirror_reflect: 0.90,
            filter_transmit: 0.85,
            corrector_strength: 1.0,
            check_back_collision: true,
            ground_reflection: GroundReflection::Lambertian,
            ground_normal: [0.0, 0.0, 1.0],
            ground_point: [0.0, 0.0, -1.0e5],
        }
    }
}

/// Exponential atmosphere parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtmosphereConfig {
    /// Scale height of the density profile (cm).
    pub scale_height: f64,
    /// Sea level density (g/cm³).
    pub rho_sea: f64,
    /// Sea level index of refraction.
    pub refrac_sea: f64,
}

impl AtmosphereConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("scale_height", self.scale_height)?;
        positive("rho_sea", self.rho_sea)?;
        within("refrac_sea", self.refrac_sea, 1.0, 1.01)?;
        Ok(())
    }
}

impl Default for AtmosphereConfig {
    fn default() -> Self {
        Self {
            scale_height: 841_300.0,
            rho_sea: 1.225e-3,
            refrac_sea: 1.000_29,
        }
    }
}

/// Shower development and light yield parameterizations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Depth-of-maximum intercept at 1 EeV (g/cm²).
    pub x_max_1: f64,
    /// Elongation rate per decade of energy (g/cm²).
    pub x_max_2: f64,
    /// Constant offset subtracted from the depth of maximum (g/cm²).
    pub x_max_3: f64,
    /// eV of primary energy per particle at maximum: `Nmax = E / n_max_ratio`.
    pub n_max_ratio: f64,
    /// Gaisser-Hillas attenuation length λ (g/cm²).
    pub gh_lambda: f64,
    /// Spectral index γ of the generated `E^{−γ}` flux.
    pub energy_pow: f64,
    /// Effective ionization loss rate coefficients (MeV per g/cm²):
    /// `α_eff(s) = c1/(c2 + s)^c3 + c4 + c5·s`.
    pub fluor_coeff: [f64; 5],
    /// Mean deposited energy per emitted fluorescence photon (MeV).
    pub fluor_photon_energy: f64,
    /// Electron spectrum shape `E/((E+a1)(E+a2)^s)`: a1 = base + slope·s.
    pub chkv_a1_base: f64,
    pub chkv_a1_slope: f64,
    /// Same for a2 (MeV).
    pub chkv_a2_base: f64,
    pub chkv_a2_slope: f64,
    /// Cherenkov photon yield scale (photons per cm per unit δ).
    pub chkv_yield: f64,
    /// Critical angle parameterization θ_c = k1 · E_thr^k2 (rad, MeV).
    pub chkv_theta_k1: f64,
    pub chkv_theta_k2: f64,
    /// Upper edge of the electron energy grid (MeV).
    pub chkv_energy_max: f64,
}

impl PhysicsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("x_max_1", self.x_max_1)?;
        positive("n_max_ratio", self.n_max_ratio)?;
        positive("gh_lambda", self.gh_lambda)?;
        within("energy_pow", self.energy_pow, 1.1, 10.0)?;
        positive("fluor_photon_energy", self.fluor_photon_energy)?;
        positive("chkv_yield", self.chkv_yield)?;
        positive("chkv_theta_k1", self.chkv_theta_k1)?;
        positive("chkv_energy_max", self.chkv_energy_max)?;
        Ok(())
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            x_max_1: 725.0,
            x_max_2: 55.0,
            x_max_3: 18.0,
            n_max_ratio: 1.39e9,
            gh_lambda: 70.0,
            energy_pow: 3.0,
            fluor_coeff: [3.90883, 1.05301, 9.91717, 2.41715, 0.13180],
            fluor_photon_energy: 0.25,
            chkv_a1_base: 6.42522,
            chkv_a1_slope: -1.53183,
            chkv_a2_base: 168.168,
            chkv_a2_slope: -42.1368,
            chkv_yield: 1.0e3,
            chkv_theta_k1: 0.010_94,
            chkv_theta_k2: 0.6073,
            chkv_energy_max: 1.0e4,
        }
    }
}

/// Night-sky background levels and triggering thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Sky background photon rate (photons / (s · sr · cm²)).
    pub sky_noise: f64,
    /// Ground background photon rate (photons / (s · sr · cm²)).
    pub gnd_noise: f64,
    /// Triggering threshold in units of the noise sigma.
    pub trigr_thresh: f64,
    /// Noise removal threshold in units of the noise sigma.
    pub noise_thresh: f64,
    /// Maximum angular distance from the shower-detector plane (rad).
    pub plane_thresh: f64,
    /// Ground impact acceptance in units of the noise sigma.
    pub impact_buffr: f64,
    /// Minimum connected cluster size that triggers a frame.
    pub trigr_clustr: usize,
    /// Seed for the reconstructor's noise generator.
    pub rng_seed: u64,
}

impl TriggerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        within("sky_noise", self.sky_noise, 0.0, f64::INFINITY)?;
        within("gnd_noise", self.gnd_noise, 0.0, f64::INFINITY)?;
        within("trigr_thresh", self.trigr_thresh, 0.0, f64::INFINITY)?;
        within("noise_thresh", self.noise_thresh, 0.0, f64::INFINITY)?;
        positive("plane_thresh", self.plane_thresh)?;
        within("impact_buffr", self.impact_buffr, 0.0, f64::INFINITY)?;
        if self.trigr_clustr < 1 {
            return Err(ConfigError::CountTooSmall {
                key: "trigr_clustr",
                value: self.trigr_clustr,
                min: 1,
            });
        }
        Ok(())
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            sky_noise: 5.0e5,
            gnd_noise: 5.0e4,
            trigr_thresh: 6.0,
            noise_thresh: 3.0,
            plane_thresh: 0.06,
            impact_buffr: 4.0,
            trigr_clustr: 5,
            rng_seed: 0x5eed_0002,
        }
    }
}

/// Forward simulation stepping and thinning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Slant depth step between photon emission points (g/cm²).
    pub depth_step: f64,
    /// Computational thinning of fluorescence photons: one traced ray
    /// deposits this weight.
    pub flor_thin: i64,
    /// Computational thinning of Cherenkov photons.
    pub chkv_thin: i64,
    /// The record ends this many ground-to-detector light travel times
    /// after the shower reaches the ground.
    pub back_toler: f64,
    /// Time bin width of the photon count record (s).
    pub time_bin: f64,
    /// Gaussian sigma of the per-photon emission time jitter (s).
    pub time_jitter: f64,
    /// Seed for the simulator's photon generator.
    pub rng_seed: u64,
}

impl SimulationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("depth_step", self.depth_step)?;
        positive("time_bin", self.time_bin)?;
        within("time_jitter", self.time_jitter, 0.0, f64::INFINITY)?;
        positive("back_toler", self.back_toler)?;
        if self.flor_thin < 1 {
            return Err(ConfigError::CountTooSmall {
                key: "flor_thin",
                value: self.flor_thin.max(0) as usize,
                min: 1,
            });
        }
        if self.chkv_thin < 1 {
            return Err(ConfigError::CountTooSmall {
                key: "chkv_thin",
                value: self.chkv_thin.max(0) as usize,
                min: 1,
            });
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            depth_step: 1.0,
            flor_thin: 1,
            chkv_thin: 10,
            back_toler: 2.0,
            time_bin: 1.0e-7,
            time_jitter: 2.0e-8,
            rng_seed: 0x5eed_0001,
        }
    }
}

/// Random shower generation ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Lower edge of the generated energy spectrum (eV).
    pub energy_min: f64,
    /// Upper edge of the generated energy spectrum (eV).
    pub energy_max: f64,
    /// Lower edge of the zenith cosine range.
    pub cosine_min: f64,
    /// Upper edge of the zenith cosine range.
    pub cosine_max: f64,
    /// Maximum impact parameter (cm); sampled uniform in area.
    pub impact_max: f64,
    /// Slant depth above the shower maximum at which tracking begins
    /// (g/cm²).
    pub start_tracking: f64,
    /// Seed for the shower generator.
    pub rng_seed: u64,
}

impl MonteCarloConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("energy_min", self.energy_min)?;
        if self.energy_min >= self.energy_max {
            return Err(ConfigError::EmptyRange {
                key: "energy",
                lo: self.energy_min,
                hi: self.energy_max,
            });
        }
        within("cosine_min", self.cosine_min, 0.05, 1.0)?;
        within("cosine_max", self.cosine_max, 0.05, 1.0)?;
        if self.cosine_min >= self.cosine_max {
            return Err(ConfigError::EmptyRange {
                key: "cosine",
                lo: self.cosine_min,
                hi: self.cosine_max,
            });
        }
        positive("impact_max", self.impact_max)?;
        positive("start_tracking", self.start_tracking)?;
        Ok(())
    }
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            energy_min: 1.0e17,
            energy_max: 1.0e21,
            cosine_min: 0.5,
            cosine_max: 1.0,
            impact_max: 2.0e6,
            start_tracking: 600.0,
            rng_seed: 0x5eed_0000,
        }
    }
}

/// The full pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub detector: DetectorConfig,
    pub atmosphere: AtmosphereConfig,
    pub physics: PhysicsConfig,
    pub trigger: TriggerConfig,
    pub simulation: SimulationConfig,
    pub monte_carlo: MonteCarloConfig,
}

impl Config {
    /// Range-check every parameter group. Components call this on
    /// construction; a failure means the core is not usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.atmosphere.validate()?;
        self.physics.validate()?;
        self.trigger.validate()?;
        self.simulation.validate()?;
        self.monte_carlo.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_bad_mirror_radius_rejected() {
        let mut config = Config::default();
        config.detector.mirror_radius = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive {
                key: "mirror_radius",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_energy_range_rejected() {
        let mut config = Config::default();
        config.monte_carlo.energy_min = 1.0e20;
        config.monte_carlo.energy_max = 1.0e19;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyRange { key: "energy", .. })
        ));
    }

    #[test]
    fn test_zero_thinning_rejected() {
        let mut config = Config::default();
        config.simulation.flor_thin = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_efficiency_product() {
        let detector = DetectorConfig::default();
        let expected = 0.85 * 0.90 * 0.85;
        assert!((detector.detector_efficiency() - expected).abs() < 1e-12);
    }
}
