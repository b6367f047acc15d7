//! Forward simulation of extensive air showers seen through Schmidt
//! optics.
//!
//! [`Simulator::simulate_shower`] walks a shower down its axis in slant
//! depth steps. At each step it evaluates the Gaisser-Hillas size,
//! emits the expected number of fluorescence photons (isotropic, with
//! the aperture's sphere fraction applied analytically) and Cherenkov
//! photons (beamed about the axis, bounced off the ground), ray-traces
//! every survivor through the corrector, mirror, and camera, and
//! deposits the arrivals into a [`PhotonCount`] record.
//!
//! The output record is noise-free; background injection belongs to
//! the reconstruction pipeline, which owns the noise model.

use log::debug;
use nalgebra::{Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use shared::atmosphere::Atmosphere;
use shared::config::{Config, ConfigError, DetectorConfig, GroundReflection, PhysicsConfig, SimulationConfig};
use shared::geometry::{make_rotation, rand_normal, random_round, Plane, Ray, LIGHT_SPEED};
use shared::photon_count::{Params, PhotonCount};
use shared::shower::Shower;

pub mod light;
pub mod monte_carlo;
pub mod optics;

pub use monte_carlo::MonteCarlo;
pub use optics::SchmidtOptics;

use light::{
    cherenkov_critical_angle, cherenkov_photons, cherenkov_threshold, fluorescence_photons,
};

/// Hard cap on depth steps per shower, well past any physical track.
const MAX_STEPS: usize = 200_000;

/// The forward simulator. Owns its configuration snapshot and RNG; one
/// instance per concurrent pipeline.
pub struct Simulator {
    detector: DetectorConfig,
    physics: PhysicsConfig,
    sim: SimulationConfig,
    atmosphere: Atmosphere,
    optics: SchmidtOptics,
    ground: Plane,
    rot_to_detector: Rotation3<f64>,
    rot_to_world: Rotation3<f64>,
    jitter: Normal<f64>,
    rng: StdRng,
    blocked: u64,
}

impl Simulator {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let rot_to_world = make_rotation(config.detector.elevation_angle);
        Ok(Self {
            optics: SchmidtOptics::new(&config.detector),
            atmosphere: Atmosphere::new(&config.atmosphere),
            ground: config.detector.ground_plane(),
            rot_to_detector: rot_to_world.inverse(),
            rot_to_world,
            jitter: Normal::new(0.0, config.simulation.time_jitter)
                .expect("time_jitter validated non-negative"),
            rng: StdRng::seed_from_u64(config.simulation.rng_seed),
            detector: config.detector.clone(),
            physics: config.physics.clone(),
            sim: config.simulation.clone(),
            blocked: 0,
        })
    }

    /// The world-frame ground plane.
    pub fn ground_plane(&self) -> Plane {
        self.ground
    }

    /// Track the shower to the ground, emitting and tracing photons,
    /// and return the resulting photon count record.
    pub fn simulate_shower(&mut self, shower: &Shower) -> PhotonCount {
        let mut shower = shower.clone();
        let cos_zenith = (-shower.direction().z).max(0.05);

        let mut count = PhotonCount::new(self.record_params(&shower));
        let efficiency = self.detector.detector_efficiency();
        self.blocked = 0;

        let mut steps = 0usize;
        loop {
            steps += 1;
            if steps > MAX_STEPS || shower.time_to_plane(&self.ground) <= 0.0 {
                break;
            }
            let height = shower.position().z + self.detector.detector_altitude;
            if height <= 0.0 {
                break;
            }
            let rho = self.atmosphere.density(height);
            let depth = self.atmosphere.vertical_depth(height) / cos_zenith;
            let n_e = shower.profile().size(depth);
            if n_e >= 1.0 {
                self.view_fluorescence_photons(&shower, depth, n_e, efficiency, &mut count);
                self.view_cherenkov_photons(
                    &shower, depth, height, rho, n_e, efficiency, &mut count,
                );
            }
            let path = self.sim.depth_step / rho;
            shower.increment_position(path / LIGHT_SPEED);
        }

        let deposited: i64 = count.time_profile().iter().sum();
        debug!(
            "simulated shower: steps={steps}, deposited={deposited}, camera_back_hits={}",
            self.blocked
        );
        count
    }

    /// Record window: opens when light from the starting point can
    /// first arrive, closes `back_toler` ground-to-detector light
    /// travel times after the shower front reaches the ground.
    fn record_params(&self, shower: &Shower) -> Params {
        let min_time = shower.time() + shower.position().norm() / LIGHT_SPEED;
        let to_ground = shower.time_to_plane(&self.ground).max(0.0);
        let ground_point = shower.position() + shower.velocity() * to_ground;
        let max_time = shower.time()
            + to_ground
            + self.sim.back_toler * ground_point.norm() / LIGHT_SPEED;
        Params {
            n_pmt_across: self.detector.n_pmt_across,
            start_time: min_time,
            max_time,
            bin_width: self.sim.time_bin,
            angular_size: self.detector.pmt_angular_size,
            linear_size: self.detector.pmt_linear_size,
            aperture_area: self.detector.stop_area(),
            elevation_angle: self.detector.elevation_angle,
        }
    }

    fn jittered_time(&mut self, shower: &Shower) -> f64 {
        shower.time() + self.jitter.sample(&mut self.rng)
    }

    /// Isotropic fluorescence: the aperture capture fraction is applied
    /// analytically, then each accepted photon is aimed at a random
    /// stop point and traced.
    fn view_fluorescence_photons(
        &mut self,
        shower: &Shower,
        depth: f64,
        n_e: f64,
        efficiency: f64,
        count: &mut PhotonCount,
    ) {
        let age = shower.age(depth);
        let total = fluorescence_photons(n_e, self.sim.depth_step, age, &self.physics);
        let position = self.rot_to_detector * shower.position();
        let expected = total * self.optics.sphere_fraction(&position) * efficiency;
        let loops = random_round(expected / self.sim.flor_thin as f64, &mut self.rng);
        for _ in 0..loops {
            let target = self.optics.random_stop_impact(&mut self.rng);
            let mut photon = Ray::photon(self.jittered_time(shower), position, target - position);
            photon.propagate_to_point(target);
            self.simulate_optics(photon, count, self.sim.flor_thin);
        }
    }

    /// Beamed Cherenkov light bounced off the ground. Only
    /// ground-reflected photons are recorded; the direct beam never
    /// enters the aperture for a down-going shower.
    #[allow(clippy::too_many_arguments)]
    fn view_cherenkov_photons(
        &mut self,
        shower: &Shower,
        depth: f64,
        height: f64,
        rho: f64,
        n_e: f64,
        efficiency: f64,
        count: &mut PhotonCount,
    ) {
        let age = shower.age(depth);
        let delta = self.atmosphere.delta(height);
        let total = cherenkov_photons(n_e, self.sim.depth_step, age, delta, rho, &self.physics);
        if total <= 0.0 {
            return;
        }
        let theta_c = cherenkov_critical_angle(cherenkov_threshold(delta), &self.physics);
        match self.detector.ground_reflection {
            GroundReflection::Lambertian => {
                self.lambertian_cherenkov(shower, total, theta_c, efficiency, count)
            }
            GroundReflection::Specular => {
                self.specular_cherenkov(shower, total, theta_c, efficiency, count)
            }
        }
    }

    fn lambertian_cherenkov(
        &mut self,
        shower: &Shower,
        total: f64,
        theta_c: f64,
        efficiency: f64,
        count: &mut PhotonCount,
    ) {
        // Expected capture for the beam core: the axis ground point.
        let to_ground = shower.time_to_plane(&self.ground);
        if !to_ground.is_finite() || to_ground <= 0.0 {
            return;
        }
        let axis_ground = shower.position() + shower.velocity() * to_ground;
        let base_capture = self.lambertian_capture(&axis_ground);
        if base_capture <= 0.0 {
            return;
        }
        let expected = total * base_capture * efficiency;
        let loops = random_round(expected / self.sim.chkv_thin as f64, &mut self.rng);
        for _ in 0..loops {
            let direction = self.cherenkov_direction(shower, theta_c);
            let mut photon = Ray::photon(self.jittered_time(shower), shower.position(), direction);
            let to_ground = photon.time_to_plane(&self.ground);
            if !to_ground.is_finite() || to_ground <= 0.0 {
                continue;
            }
            photon.propagate_to_plane(&self.ground);
            // Correct the per-photon capture relative to the beam-core
            // estimate, keeping the deposit an integer weight.
            let capture = self.lambertian_capture(&photon.position());
            let weight = random_round(
                self.sim.chkv_thin as f64 * capture / base_capture,
                &mut self.rng,
            );
            if weight <= 0 {
                continue;
            }
            let target = self.optics.random_stop_impact(&mut self.rng);
            let mut photon = photon.transformed(&self.rot_to_detector);
            photon.propagate_to_point(target);
            self.simulate_optics(photon, count, weight);
        }
    }

    fn specular_cherenkov(
        &mut self,
        shower: &Shower,
        total: f64,
        theta_c: f64,
        efficiency: f64,
        count: &mut PhotonCount,
    ) {
        // Mirror the aperture across the ground plane: a specular
        // bounce reaches the stop exactly when the emission points at
        // the image stop.
        let image_origin = self.mirror_across_ground(&Vector3::zeros());
        let offset = image_origin - shower.position();
        let range = offset.norm();
        if range == 0.0 {
            return;
        }
        let to_image = offset / range;
        let theta = shower.direction().angle(&to_image);
        if theta >= std::f64::consts::FRAC_PI_2 {
            return;
        }
        let sin_theta = theta.sin().max(1e-6);
        let pdf_sr = (-theta / theta_c).exp()
            / (2.0 * std::f64::consts::PI * theta_c * sin_theta);
        let axis_world = self.rot_to_world * Vector3::z();
        let ground_normal = self.ground.normal();
        let stop_normal_image = axis_world - 2.0 * axis_world.dot(&ground_normal) * ground_normal;
        let cos_phi = (-to_image).dot(&stop_normal_image).max(0.0);
        let solid_angle = self.detector.stop_area() * cos_phi / (range * range);
        let capture = (pdf_sr * solid_angle).clamp(0.0, 1.0);
        if capture <= 0.0 {
            return;
        }
        let expected = total * capture * efficiency;
        let loops = random_round(expected / self.sim.chkv_thin as f64, &mut self.rng);
        for _ in 0..loops {
            let stop_point = self.optics.random_stop_impact(&mut self.rng);
            let stop_world = self.rot_to_world * stop_point;
            let image_point = self.mirror_across_ground(&stop_world);
            let mut photon = Ray::photon(
                self.jittered_time(shower),
                shower.position(),
                image_point - shower.position(),
            );
            let to_ground = photon.time_to_plane(&self.ground);
            if !to_ground.is_finite() || to_ground <= 0.0 {
                continue;
            }
            photon.propagate_to_plane(&self.ground);
            photon.reflect(self.ground.normal());
            let mut photon = photon.transformed(&self.rot_to_detector);
            photon.propagate_to_point(stop_point);
            self.simulate_optics(photon, count, self.sim.chkv_thin);
        }
    }

    /// Probability that a Lambertian bounce at the world-frame ground
    /// point `ground` sends the photon through the stop.
    fn lambertian_capture(&self, ground: &Vector3<f64>) -> f64 {
        let range_sq = ground.norm_squared();
        if range_sq == 0.0 {
            return 0.0;
        }
        let toward_detector = -ground / range_sq.sqrt();
        let cos_lobe = toward_detector.dot(&self.ground.normal()).max(0.0);
        let ground_det = self.rot_to_detector * ground;
        let cos_stop = (-ground_det.normalize()).z.max(0.0);
        let capture =
            self.detector.stop_area() * cos_stop * cos_lobe / (std::f64::consts::PI * range_sq);
        capture.clamp(0.0, 1.0)
    }

    /// Emission direction about the shower axis with the
    /// `exp(−θ/θ_c)` marginal in θ.
    fn cherenkov_direction(&mut self, shower: &Shower, theta_c: f64) -> Vector3<f64> {
        let u: f64 = self.rng.gen();
        let theta = (-theta_c * (1.0 - u).ln()).min(std::f64::consts::FRAC_PI_2 * 0.999);
        let normal = rand_normal(&shower.direction(), &mut self.rng);
        shower.direction() * theta.cos() + normal * theta.sin()
    }

    /// Reflection of a world-frame point across the ground plane.
    fn mirror_across_ground(&self, point: &Vector3<f64>) -> Vector3<f64> {
        point - 2.0 * self.ground.distance(point) * self.ground.normal()
    }

    /// Trace one photon sitting at the stop through corrector, mirror,
    /// and camera; deposit on success.
    fn simulate_optics(&mut self, mut photon: Ray, count: &mut PhotonCount, weight: i64) {
        if !self.optics.deflect_from_lens(&mut photon) {
            return;
        }
        let Some(mirror) = self.optics.mirror_impact_point(&photon) else {
            return;
        };
        if self.optics.blocked_by_camera(&photon.position(), &mirror) {
            self.blocked += 1;
            if self.detector.check_back_collision {
                return;
            }
        }
        photon.propagate_to_point(mirror);
        photon.reflect(SchmidtOptics::mirror_normal(&mirror));
        let Some(camera) = self.optics.camera_impact_point(&photon) else {
            return;
        };
        photon.propagate_to_point(camera);
        let view = -camera.normalize();
        count.add_photon(photon.time(), &view, weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_free_config() -> Config {
        let mut config = Config::default();
        config.trigger.sky_noise = 0.0;
        config.trigger.gnd_noise = 0.0;
        config
    }

    fn simulate(axis: Vector3<f64>) -> (Shower, PhotonCount) {
        let config = noise_free_config();
        let mut mc = MonteCarlo::new(&config).unwrap();
        let mut simulator = Simulator::new(&config).unwrap();
        let shower = mc.generate_shower(&axis, 1.0e6, 0.0, 1.0e19);
        let count = simulator.simulate_shower(&shower);
        (shower, count)
    }

    #[test]
    fn test_straight_shower_illuminates_track() {
        let (_, count) = simulate(Vector3::new(0.0, 0.0, -1.0));
        let total: i64 = count.time_profile().iter().sum();
        assert!(total > 1000, "only {total} photons deposited");

        // The brightly lit pixels must form a track, not a blob: the
        // span across the track (the x coordinate, for a shower in the
        // y-z plane) stays within a few pixels. Faint Cherenkov
        // stragglers off the beam core are exempt.
        let map = count.sum_map();
        let mut xs = Vec::new();
        for ((x, _y), &v) in map.indexed_iter() {
            if v >= 10 {
                xs.push(x);
            }
        }
        let min_x = *xs.iter().min().unwrap();
        let max_x = *xs.iter().max().unwrap();
        assert!(max_x - min_x < 10, "track width {}", max_x - min_x);
    }

    #[test]
    fn test_arrival_times_ordered_down_the_track() {
        // For a vertical shower the high-elevation pixels light up
        // before the low ones.
        let (_, count) = simulate(Vector3::new(0.0, 0.0, -1.0));
        let mut iter = count.iterator();
        let mut by_elevation: Vec<(f64, f64)> = Vec::new();
        while iter.next() {
            let series = count.counts(iter.x(), iter.y());
            let sum: i64 = series.iter().sum();
            if sum < 20 {
                continue;
            }
            let mean_time: f64 = series
                .iter()
                .enumerate()
                .map(|(i, &c)| count.bin_time(i) * c as f64)
                .sum::<f64>()
                / sum as f64;
            let elevation = count.direction(&iter).z;
            by_elevation.push((elevation, mean_time));
        }
        assert!(by_elevation.len() > 10, "too few lit pixels");
        by_elevation.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let lowest = by_elevation.first().unwrap().1;
        let highest = by_elevation.last().unwrap().1;
        assert!(
            highest < lowest,
            "high pixels ({highest:.2e}) should precede low ({lowest:.2e})"
        );
    }

    #[test]
    fn test_deposits_within_record_window() {
        let (shower, count) = simulate(Vector3::new(1.0, 0.0, -2.0));
        let params = *count.params();
        assert!(params.start_time >= shower.time());
        assert!(params.max_time > params.start_time);
        let profile = count.time_profile();
        assert_eq!(profile.len(), count.n_bins());
    }

    #[test]
    fn test_simulation_deterministic() {
        let config = noise_free_config();
        let run = |seed_config: &Config| {
            let mut mc = MonteCarlo::new(seed_config).unwrap();
            let mut simulator = Simulator::new(seed_config).unwrap();
            let shower = mc.generate_shower(&Vector3::new(0.0, 0.0, -1.0), 1.0e6, 0.0, 1.0e19);
            simulator.simulate_shower(&shower).time_profile()
        };
        assert_eq!(run(&config), run(&config));
    }

    #[test]
    fn test_ground_pixels_see_cherenkov_flash() {
        let (_, count) = simulate(Vector3::new(0.0, 0.0, -1.0));
        let mut iter = count.iterator();
        let mut below = 0i64;
        while iter.next() {
            if count.direction(&iter).z < 0.0 {
                below += count.sum_bins(&iter);
            }
        }
        assert!(below > 50, "ground flash too dim: {below}");
    }
}
