//! Shared helpers for the end-to-end reconstruction tests.

use nalgebra::Vector3;

use reconstruct::{Reconstruction, Reconstructor};
use shared::config::Config;
use shared::photon_count::PhotonCount;
use shared::shower::Shower;
use simulator::{MonteCarlo, Simulator};

/// The default pipeline configuration with the background switched
/// off, for accuracy scenarios.
pub fn noise_free_config() -> Config {
    let mut config = Config::default();
    config.trigger.sky_noise = 0.0;
    config.trigger.gnd_noise = 0.0;
    config
}

/// Generate, simulate, and return the true shower with its record.
pub fn simulate(
    config: &Config,
    axis: Vector3<f64>,
    impact_param: f64,
    impact_angle: f64,
    energy: f64,
) -> (Shower, PhotonCount) {
    let mut monte_carlo = MonteCarlo::new(config).expect("config must validate");
    let mut simulator = Simulator::new(config).expect("config must validate");
    let shower = monte_carlo.generate_shower(&axis, impact_param, impact_angle, energy);
    let data = simulator.simulate_shower(&shower);
    (shower, data)
}

/// Full chain: generate, simulate, reconstruct.
pub fn simulate_and_reconstruct(
    config: &Config,
    axis: Vector3<f64>,
    impact_param: f64,
    impact_angle: f64,
    energy: f64,
) -> (Shower, Reconstruction) {
    let (shower, data) = simulate(config, axis, impact_param, impact_angle, energy);
    let mut reconstructor = Reconstructor::new(config).expect("config must validate");
    (shower, reconstructor.reconstruct(data))
}

/// Angle between two directions, sign-insensitive (an axis has no
/// preferred orientation for this comparison).
pub fn axis_angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let cos = a.normalize().dot(&b.normalize()).abs().clamp(0.0, 1.0);
    cos.acos()
}
