//! Reconstruction pipeline for photon count records.
//!
//! The pipeline is strictly ordered; each stage mutates or consumes
//! the cube:
//!
//! ```text
//!            ┌─────┐
//!            │ Raw │
//!            └──┬──┘
//!               │ add_noise
//!         ┌─────▼──────┐
//!         │   Noised   │
//!         └─────┬──────┘
//!               │ subtract_average_noise
//!         ┌─────▼──────┐
//!         │ Subtracted │
//!         └─────┬──────┘
//!               │ three_sigma_filter
//!         ┌─────▼──────┐
//!         │  Filtered  │
//!         └─────┬──────┘
//!               │ apply_triggering
//!      ┌────────▼────────┐     no cluster
//!      │    Triggered    ├──────────────► Untriggered (default result)
//!      └────────┬────────┘
//!               │ plane subset + flood
//!         ┌─────▼──────┐
//!         │   Planed   │
//!         └─────┬──────┘
//!               │ SDP fit, monocular fit, hybrid fit
//!         ┌─────▼──────┐
//!         │    Fit     │
//!         └────────────┘
//! ```
//!
//! An untriggered record short-circuits to the default
//! [`Reconstruction`]. Fit degeneracies are reported through the
//! result (`rp ≤ 0` sentinel showers), never as panics.

use log::debug;
use nalgebra::{Rotation3, Vector2, Vector3};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use shared::config::{Config, ConfigError, TriggerConfig};
use shared::geometry::{Plane, Ray};
use shared::photon_count::{PhotonCount, SignalIterator};
use shared::shower::Shower;

mod profile_fit;
mod sdp;
mod trigger;

pub use profile_fit::{FitConfig, FitSummary};

use profile_fit::{collect_fit_points, hybrid_fit, monocular_fit, orient_to_shower};

/// Pipeline stage reached by the most recent call on a
/// [`Reconstructor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Raw,
    Noised,
    Subtracted,
    Filtered,
    Triggered,
    Untriggered,
    Planed,
    Fit,
}

/// Outcome of a full reconstruction pass.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Whether any frame passed the cluster trigger.
    pub triggered: bool,
    /// Whether a ground impact was found and the hybrid fit attempted.
    pub chkv_tried: bool,
    /// Monocular time-profile reconstruction (sentinel when invalid).
    pub mono_recon: Shower,
    /// Hybrid reconstruction using the Cherenkov ground impact.
    pub chkv_recon: Shower,
    /// Fitted monocular parameters.
    pub mono_fit: FitSummary,
    /// Fitted hybrid parameters.
    pub chkv_fit: FitSummary,
}

impl Reconstruction {
    fn untriggered() -> Self {
        Self {
            triggered: false,
            chkv_tried: false,
            mono_recon: Shower::sentinel(),
            chkv_recon: Shower::sentinel(),
            mono_fit: FitSummary::invalid(),
            chkv_fit: FitSummary::invalid(),
        }
    }

    /// CSV header matching [`Reconstruction::to_row`].
    pub fn header() -> String {
        let shower_fields = |prefix: &str| {
            format!(
                "{p}_vx,{p}_vy,{p}_vz,{p}_rp,{p}_psi,{p}_t0,{p}_impact_x,{p}_impact_y,{p}_impact_z",
                p = prefix
            )
        };
        format!(
            "triggered,chkv_tried,{},{}",
            shower_fields("mono"),
            shower_fields("chkv")
        )
    }

    /// CSV row: trigger flags, then axis, impact parameter, ψ, t₀, and
    /// derived ground impact for each reconstruction.
    pub fn to_row(&self, ground: &Plane) -> String {
        format!(
            "{},{},{},{}",
            self.triggered,
            self.chkv_tried,
            shower_fields(&self.mono_recon, &self.mono_fit, ground),
            shower_fields(&self.chkv_recon, &self.chkv_fit, ground),
        )
    }
}

fn shower_fields(shower: &Shower, fit: &FitSummary, ground: &Plane) -> String {
    if !shower.is_valid() {
        return std::iter::repeat("nan")
            .take(9)
            .collect::<Vec<_>>()
            .join(",");
    }
    let d = shower.direction();
    let ray = Ray::photon(fit.t0, shower.position(), d);
    let to_ground = ray.time_to_plane(ground);
    let impact = if to_ground.is_finite() && to_ground > 0.0 {
        let mut ray = ray;
        ray.propagate_to_plane(ground);
        ray.position()
    } else {
        Vector3::new(f64::NAN, f64::NAN, f64::NAN)
    };
    format!(
        "{:.6},{:.6},{:.6},{:e},{:.6},{:e},{:e},{:e},{:e}",
        d.x, d.y, d.z, fit.rp, fit.psi, fit.t0, impact.x, impact.y, impact.z
    )
}

/// The reconstruction pipeline. Owns its configuration snapshot, noise
/// RNG, and the stage marker; one instance per concurrent pipeline.
pub struct Reconstructor {
    trigger: TriggerConfig,
    ground: Plane,
    fit_config: FitConfig,
    rng: StdRng,
    stage: Stage,
}

impl Reconstructor {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            trigger: config.trigger.clone(),
            ground: config.detector.ground_plane(),
            fit_config: FitConfig::default(),
            rng: StdRng::seed_from_u64(config.trigger.rng_seed),
            stage: Stage::Raw,
        })
    }

    /// Stage reached by the most recent pipeline call.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Fit the shower-detector plane of the record as it stands.
    /// Returns the world-to-plane rotation whose z-axis is the SDP
    /// normal, or None when the count-weighted matrix is degenerate.
    pub fn fit_sd_plane(&self, data: &PhotonCount) -> Option<Rotation3<f64>> {
        sdp::fit_sd_plane(data, None)
    }

    /// Background rate for the iterator's pixel: sky rate above the
    /// horizon, ground rate below.
    fn pixel_rate(&self, data: &PhotonCount, iter: &SignalIterator) -> f64 {
        if data.direction(iter).z < 0.0 {
            self.trigger.gnd_noise
        } else {
            self.trigger.sky_noise
        }
    }

    /// Inject Poisson night-sky and ground background into every pixel.
    pub fn add_noise(&mut self, data: &mut PhotonCount) {
        let mut iter = data.iterator();
        while iter.next() {
            let rate = self.pixel_rate(data, &iter);
            data.add_noise(rate, &iter, &mut self.rng);
        }
        self.stage = Stage::Noised;
        debug!("noise added: total={}", data.time_profile().iter().sum::<i64>());
    }

    /// Subtract the expected background level from every pixel.
    pub fn subtract_average_noise(&mut self, data: &mut PhotonCount) {
        let mut iter = data.iterator();
        while iter.next() {
            let rate = self.pixel_rate(data, &iter);
            data.subtract_noise(rate, &iter);
        }
        self.stage = Stage::Subtracted;
    }

    /// Zero every bin below `noise_thresh` sigma of its pixel's
    /// background.
    pub fn three_sigma_filter(&mut self, data: &mut PhotonCount) {
        let mut iter = data.iterator();
        while iter.next() {
            let sigma = data.noise_mean_bin(self.pixel_rate(data, &iter)).sqrt();
            data.erase_below(self.trigger.noise_thresh * sigma, &iter);
        }
        self.stage = Stage::Filtered;
    }

    /// Cluster triggering, plane subset, and 3-D flood retention.
    /// Returns false (leaving the record as filtered) when no frame
    /// triggers.
    pub fn apply_triggering(&mut self, data: &mut PhotonCount) -> bool {
        let n = data.params().n_pmt_across;
        let n_bins = data.n_bins();

        let mut trigger_mask = Array3::from_elem((n, n, n_bins), false);
        let mut signal_mask = Array3::from_elem((n, n, n_bins), false);
        let mut iter = data.iterator();
        while iter.next() {
            let sigma = data.noise_mean_bin(self.pixel_rate(data, &iter)).sqrt();
            let hot = data.above_threshold(self.trigger.trigr_thresh * sigma, &iter);
            for (t, &flag) in hot.iter().enumerate() {
                trigger_mask[[iter.x(), iter.y(), t]] = flag;
            }
            for (t, &count) in data.counts(iter.x(), iter.y()).iter().enumerate() {
                signal_mask[[iter.x(), iter.y(), t]] = count > 0;
            }
        }

        let mut triggered_frames = vec![false; n_bins];
        let mut any_triggered = false;
        for (t, frame_flag) in triggered_frames.iter_mut().enumerate() {
            let frame = Array2::from_shape_fn((n, n), |(x, y)| trigger_mask[[x, y, t]]);
            *frame_flag = trigger::frame_triggered(&frame.view(), self.trigger.trigr_clustr);
            any_triggered |= *frame_flag;
        }
        if !any_triggered {
            self.stage = Stage::Untriggered;
            return false;
        }
        self.stage = Stage::Triggered;

        // Seeds: trigger-level cells inside triggered frames.
        let mut seeds = trigger_mask;
        for ((_, _, t), seed) in seeds.indexed_iter_mut() {
            *seed = *seed && triggered_frames[t];
        }

        // Keep only directions near a provisional plane through the
        // seeds; a degenerate provisional fit skips the subset.
        if let Some(provisional) = sdp::fit_sd_plane(data, Some(&seeds)) {
            let mut iter = data.iterator();
            while iter.next() {
                let distance = sdp::plane_distance(&provisional, &data.direction(&iter));
                if distance >= self.trigger.plane_thresh {
                    for t in 0..n_bins {
                        signal_mask[[iter.x(), iter.y(), t]] = false;
                        seeds[[iter.x(), iter.y(), t]] = false;
                    }
                }
            }
        }

        let visited = trigger::flood_retain(&seeds, &signal_mask);
        data.retain(&visited);
        self.stage = Stage::Planed;
        true
    }

    /// Noise removal pipeline: subtract, filter, trigger, flood.
    /// Returns false when the record never triggers.
    pub fn clear_noise(&mut self, data: &mut PhotonCount) -> bool {
        self.subtract_average_noise(data);
        self.three_sigma_filter(data);
        self.apply_triggering(data)
    }

    /// Count-weighted centroid of the below-horizon signal,
    /// intersected with the ground plane. None when the total weight
    /// stays within `impact_buffr` sigma of the ground background.
    pub fn find_ground_impact(&self, data: &PhotonCount) -> Option<Vector3<f64>> {
        let mut weight_sum = 0.0;
        let mut centroid = Vector3::zeros();
        let mut pixels_below = 0usize;
        let mut iter = data.iterator();
        while iter.next() {
            let direction = data.direction(&iter);
            if direction.z >= 0.0 {
                continue;
            }
            pixels_below += 1;
            let weight = data.sum_bins(&iter) as f64;
            if weight > 0.0 {
                weight_sum += weight;
                centroid += direction * weight;
            }
        }
        let expected_noise = pixels_below as f64
            * data.noise_mean_bin(self.trigger.gnd_noise)
            * data.n_bins() as f64;
        if weight_sum <= self.trigger.impact_buffr * expected_noise.sqrt() || weight_sum == 0.0 {
            return None;
        }
        let mut ray = Ray::photon(0.0, Vector3::zeros(), centroid);
        let to_ground = ray.time_to_plane(&self.ground);
        if !to_ground.is_finite() || to_ground <= 0.0 {
            return None;
        }
        ray.propagate_to_plane(&self.ground);
        Some(ray.position())
    }

    /// Run the full pipeline and return the reconstruction.
    pub fn reconstruct(&mut self, mut data: PhotonCount) -> Reconstruction {
        self.stage = Stage::Raw;
        self.add_noise(&mut data);
        if !self.clear_noise(&mut data) {
            debug!("record did not trigger");
            return Reconstruction::untriggered();
        }

        let Some(to_plane) = sdp::fit_sd_plane(&data, None) else {
            debug!("SDP fit degenerate after cleaning");
            self.stage = Stage::Fit;
            let mut result = Reconstruction::untriggered();
            result.triggered = true;
            return result;
        };
        let to_plane = orient_to_shower(&data, &to_plane);

        let points = collect_fit_points(&data, &to_plane);
        let mono_fit = monocular_fit(&points, &self.fit_config);
        debug!(
            "monocular fit: rp={:.3e} psi={:.3} t0={:.3e} chi2={:.3e} converged={} ({} points)",
            mono_fit.rp,
            mono_fit.psi,
            mono_fit.t0,
            mono_fit.chi2,
            mono_fit.converged,
            points.len()
        );
        let mut result = Reconstruction {
            triggered: true,
            chkv_tried: false,
            mono_recon: shower_from_fit(&mono_fit, &to_plane),
            chkv_recon: Shower::sentinel(),
            mono_fit,
            chkv_fit: FitSummary::invalid(),
        };

        if let Some(impact) = self.find_ground_impact(&data) {
            result.chkv_tried = true;
            let in_plane = to_plane * impact;
            let chkv_fit = hybrid_fit(
                &points,
                &Vector2::new(in_plane.x, in_plane.y),
                &self.fit_config,
            );
            debug!(
                "hybrid fit: rp={:.3e} psi={:.3} converged={}",
                chkv_fit.rp, chkv_fit.psi, chkv_fit.converged
            );
            result.chkv_recon = shower_through_impact(&chkv_fit, &to_plane, &impact);
            result.chkv_fit = chkv_fit;
        }
        self.stage = Stage::Fit;
        result
    }
}

/// Shower through the fitted closest-approach point: the axis lies in
/// the plane at angle ψ, the closest approach at distance Rp.
fn shower_from_fit(fit: &FitSummary, to_plane: &Rotation3<f64>) -> Shower {
    if !fit.is_valid() {
        return Shower::sentinel();
    }
    let from_plane = to_plane.inverse();
    let direction = from_plane * Vector3::new(fit.psi.cos(), -fit.psi.sin(), 0.0);
    let closest = from_plane * Vector3::new(fit.rp * fit.psi.sin(), fit.rp * fit.psi.cos(), 0.0);
    Shower::geometry(fit.t0, closest, direction)
}

/// Shower with the hybrid-fit direction, pinned to pass through the
/// measured ground impact point.
fn shower_through_impact(
    fit: &FitSummary,
    to_plane: &Rotation3<f64>,
    impact: &Vector3<f64>,
) -> Shower {
    if !fit.is_valid() {
        return Shower::sentinel();
    }
    let direction = to_plane.inverse() * Vector3::new(fit.psi.cos(), -fit.psi.sin(), 0.0);
    let closest = impact - impact.dot(&direction) * direction;
    Shower::geometry(fit.t0, closest, direction)
}
