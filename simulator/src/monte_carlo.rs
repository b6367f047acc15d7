//! Shower generation.
//!
//! Draws shower parameters from the configured distributions (power-law
//! energy, uniform zenith cosine, uniform-areal impact parameter) or
//! builds a deterministic shower from explicit parameters. Also owns
//! the depth-of-maximum and size-at-maximum parameterizations.

use std::f64::consts::TAU;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shared::atmosphere::Atmosphere;
use shared::config::{Config, ConfigError, MonteCarloConfig, PhysicsConfig};
use shared::geometry::normal_at_angle;
use shared::shower::{Profile, Shower};

/// Cap on the tracking start height (cm above sea level); showers that
/// would start higher are clipped to the top of the model atmosphere.
const MAX_START_HEIGHT: f64 = 5.0e6;

/// Random and deterministic shower factory.
pub struct MonteCarlo {
    atmosphere: Atmosphere,
    physics: PhysicsConfig,
    params: MonteCarloConfig,
    detector_altitude: f64,
    rng: StdRng,
}

impl MonteCarlo {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            atmosphere: Atmosphere::new(&config.atmosphere),
            physics: config.physics.clone(),
            params: config.monte_carlo.clone(),
            detector_altitude: config.detector.detector_altitude,
            rng: StdRng::seed_from_u64(config.monte_carlo.rng_seed),
        })
    }

    /// A shower with random energy, direction, and impact point drawn
    /// from the configured distributions.
    pub fn generate_random_shower(&mut self) -> Shower {
        let energy = self.sample_energy();
        let cos_zenith = self
            .rng
            .gen_range(self.params.cosine_min..self.params.cosine_max);
        let sin_zenith = (1.0 - cos_zenith * cos_zenith).sqrt();
        let azimuth = self.rng.gen::<f64>() * TAU;
        let axis = Vector3::new(
            sin_zenith * azimuth.cos(),
            sin_zenith * azimuth.sin(),
            -cos_zenith,
        );
        let impact_param = self.params.impact_max * self.rng.gen::<f64>().sqrt();
        let impact_angle = self.rng.gen::<f64>() * TAU;
        self.generate_shower(&axis, impact_param, impact_angle, energy)
    }

    /// Inverse-CDF draw from the `E^{−γ}` spectrum.
    fn sample_energy(&mut self) -> f64 {
        let g = 1.0 - self.physics.energy_pow;
        let lo = self.params.energy_min.powf(g);
        let hi = self.params.energy_max.powf(g);
        let u = self.rng.gen::<f64>();
        (lo + u * (hi - lo)).powf(1.0 / g)
    }

    /// Deterministic shower along `axis` (downward unit vector) with
    /// closest approach `impact_param` cm from the detector, rotated by
    /// `impact_angle` about the axis from the reference normal, with
    /// primary energy `energy` eV.
    ///
    /// The starting position sits `start_tracking` g/cm² of slant depth
    /// above the depth of maximum, so the whole visible development is
    /// tracked.
    pub fn generate_shower(
        &mut self,
        axis: &Vector3<f64>,
        impact_param: f64,
        impact_angle: f64,
        energy: f64,
    ) -> Shower {
        let axis = axis.normalize();
        let x_max =
            self.physics.x_max_1 + self.physics.x_max_2 * (energy.log10() - 18.0)
                - self.physics.x_max_3;
        let n_max = energy / self.physics.n_max_ratio;

        let closest = impact_param * normal_at_angle(&axis, impact_angle);
        let cos_zenith = (-axis.z).max(0.05);
        let start_depth = (x_max - self.params.start_tracking).max(5.0);
        let start_height = self
            .atmosphere
            .height_for_depth(start_depth * cos_zenith)
            .min(MAX_START_HEIGHT);
        let target_z = start_height - self.detector_altitude;
        let along = (target_z - closest.z) / axis.z;
        let start_position = closest + axis * along;

        Shower::new(
            0.0,
            start_position,
            axis,
            energy,
            Profile::GaisserHillas {
                n_max,
                x_max,
                lambda: self.physics.gh_lambda,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn monte_carlo() -> MonteCarlo {
        MonteCarlo::new(&Config::default()).unwrap()
    }

    #[test]
    fn test_deterministic_shower_geometry() {
        let mut mc = monte_carlo();
        let shower = mc.generate_shower(&Vector3::new(0.0, 0.0, -1.0), 1.0e6, 0.0, 1.0e19);
        // Axis preserved, impact parameter as requested.
        assert_relative_eq!(shower.direction().z, -1.0, epsilon = 1e-12);
        assert_relative_eq!(shower.impact_param(), 1.0e6, epsilon = 1.0);
        // Closest approach sits along +y from the detector.
        let ca = shower.closest_approach();
        assert_relative_eq!(ca.y, 1.0e6, epsilon = 1.0);
        // Starts above the depth of maximum.
        assert!(shower.position().z > 0.0);
    }

    #[test]
    fn test_x_max_elongation() {
        let mut mc = monte_carlo();
        let low = mc.generate_shower(&Vector3::new(0.0, 0.0, -1.0), 1.0e6, 0.0, 1.0e18);
        let high = mc.generate_shower(&Vector3::new(0.0, 0.0, -1.0), 1.0e6, 0.0, 1.0e19);
        let x_low = low.profile().x_max().unwrap();
        let x_high = high.profile().x_max().unwrap();
        // One decade of energy adds x_max_2 of depth.
        assert_relative_eq!(x_high - x_low, 55.0, epsilon = 1e-9);
        assert_relative_eq!(x_low, 725.0 - 18.0, epsilon = 1e-9);
    }

    #[test]
    fn test_n_max_scales_with_energy() {
        let mut mc = monte_carlo();
        let shower = mc.generate_shower(&Vector3::new(0.0, 0.0, -1.0), 1.0e6, 0.0, 1.39e19);
        assert_relative_eq!(shower.profile().n_max().unwrap(), 1.0e10, epsilon = 1.0);
    }

    #[test]
    fn test_random_showers_within_ranges() {
        let mut mc = monte_carlo();
        let config = MonteCarloConfig::default();
        for _ in 0..64 {
            let shower = mc.generate_random_shower();
            let energy = shower.energy().unwrap();
            assert!(energy >= config.energy_min && energy <= config.energy_max);
            let cos_zenith = -shower.direction().z;
            assert!(cos_zenith >= config.cosine_min - 1e-12);
            assert!(cos_zenith <= config.cosine_max + 1e-12);
            assert!(shower.impact_param() <= config.impact_max * 1.0001);
        }
    }

    #[test]
    fn test_energy_spectrum_falls() {
        // With γ = 3 the decade above 1e17 must dominate the sample.
        let mut mc = monte_carlo();
        let mut low = 0;
        let mut total = 0;
        for _ in 0..512 {
            let shower = mc.generate_random_shower();
            total += 1;
            if shower.energy().unwrap() < 1.0e18 {
                low += 1;
            }
        }
        assert!(low * 10 > total * 9, "{low}/{total} below 1e18");
    }

    #[test]
    fn test_reproducible_with_seed() {
        let mut a = monte_carlo();
        let mut b = monte_carlo();
        for _ in 0..8 {
            assert_eq!(a.generate_random_shower(), b.generate_random_shower());
        }
    }
}
