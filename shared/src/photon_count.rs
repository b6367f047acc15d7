//! The pixelated, time-binned photon record.
//!
//! A [`PhotonCount`] maps every pixel `(x, y)` inside the camera disk to
//! a series of non-negative integer counts, one per time bin. Pixel
//! series start empty and grow on demand, so a quiet pixel costs
//! nothing until noise injection touches it.
//!
//! The pixel ↔ direction mapping is fixed at construction: pixel
//! `(x, y)` views along the detector axis deflected by
//! `θ_p·(x − c)` and `θ_p·(y − c)` about the two transverse camera
//! axes (`c = N/2`), rotated into the world frame by the detector
//! elevation. [`PhotonCount::add_photon`] inverts the same mapping, so
//! depositing a photon along a pixel's view direction always lands in
//! that pixel.

use nalgebra::{Rotation3, Vector3};
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Poisson};

use crate::geometry::make_rotation;

/// Construction parameters of a photon count record.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// Number of photomultipliers across the camera diameter.
    pub n_pmt_across: usize,
    /// Absolute time of the left edge of bin 0 (s).
    pub start_time: f64,
    /// End of the record (s); arrivals past this are dropped.
    pub max_time: f64,
    /// Time bin width (s).
    pub bin_width: f64,
    /// Angle subtended by one photomultiplier (rad).
    pub angular_size: f64,
    /// Side length of one photomultiplier (cm).
    pub linear_size: f64,
    /// Aperture stop area (cm²), used for noise expectations.
    pub aperture_area: f64,
    /// Detector elevation above the horizon (rad).
    pub elevation_angle: f64,
}

/// Dump header for external persistence of a photon count record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DumpHeader {
    pub n_pmt_across: usize,
    pub start_time: f64,
    pub bin_width: f64,
    pub angular_size: f64,
}

/// One valid pixel's series in a dump.
#[derive(Debug, Clone, Copy)]
pub struct PixelRecord<'a> {
    pub x: usize,
    pub y: usize,
    pub counts: &'a [i64],
}

/// Cursor over the valid pixels of a cube, in row-major order. Obtain
/// with [`PhotonCount::iterator`], advance with [`SignalIterator::next`].
#[derive(Debug, Clone)]
pub struct SignalIterator {
    valid: Array2<bool>,
    x: usize,
    y: usize,
    started: bool,
}

impl SignalIterator {
    fn new(valid: Array2<bool>) -> Self {
        Self {
            valid,
            x: 0,
            y: 0,
            started: false,
        }
    }

    /// Current x index. Meaningless before the first `next()`.
    pub fn x(&self) -> usize {
        self.x
    }

    /// Current y index.
    pub fn y(&self) -> usize {
        self.y
    }

    /// Advance to the next valid pixel. Returns false past the end.
    pub fn next(&mut self) -> bool {
        let n = self.valid.nrows();
        loop {
            if !self.started {
                self.started = true;
            } else {
                self.y += 1;
                if self.y >= n {
                    self.y = 0;
                    self.x += 1;
                }
            }
            if self.x >= n {
                return false;
            }
            if self.valid[[self.x, self.y]] {
                return true;
            }
        }
    }

    /// Return to the starting state.
    pub fn reset(&mut self) {
        self.x = 0;
        self.y = 0;
        self.started = false;
    }
}

/// The 3-D photon count cube.
#[derive(Debug, Clone)]
pub struct PhotonCount {
    params: Params,
    /// Ragged per-pixel series, indexed `x * n + y`.
    counts: Vec<Vec<i64>>,
    valid: Array2<bool>,
    rot_to_world: Rotation3<f64>,
    n_bins: usize,
}

impl PhotonCount {
    pub fn new(params: Params) -> Self {
        let n = params.n_pmt_across;
        let center = n as f64 / 2.0;
        let radius_sq = center * center;
        let valid = Array2::from_shape_fn((n, n), |(x, y)| {
            let dx = x as f64 - center;
            let dy = y as f64 - center;
            dx * dx + dy * dy <= radius_sq
        });
        let n_bins = ((params.max_time - params.start_time) / params.bin_width)
            .ceil()
            .max(1.0) as usize;
        Self {
            counts: vec![Vec::new(); n * n],
            valid,
            rot_to_world: make_rotation(params.elevation_angle),
            n_bins,
            params,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Total number of time bins in the record.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Full record duration (s).
    pub fn duration(&self) -> f64 {
        self.n_bins as f64 * self.params.bin_width
    }

    /// Solid angle viewed by one pixel (sr).
    pub fn pixel_solid_angle(&self) -> f64 {
        self.params.angular_size * self.params.angular_size
    }

    /// Center time of bin `i`.
    pub fn bin_time(&self, i: usize) -> f64 {
        self.params.start_time + (i as f64 + 0.5) * self.params.bin_width
    }

    /// Whether `(x, y)` lies inside the camera disk.
    pub fn valid(&self, x: usize, y: usize) -> bool {
        x < self.params.n_pmt_across && y < self.params.n_pmt_across && self.valid[[x, y]]
    }

    /// Cursor over valid pixels.
    pub fn iterator(&self) -> SignalIterator {
        SignalIterator::new(self.valid.clone())
    }

    /// Number of valid pixels.
    pub fn n_valid_pixels(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    fn index(&self, x: usize, y: usize) -> usize {
        x * self.params.n_pmt_across + y
    }

    /// The (possibly short or empty) series of pixel `(x, y)`.
    pub fn counts(&self, x: usize, y: usize) -> &[i64] {
        &self.counts[self.index(x, y)]
    }

    /// Detector-frame view direction of pixel `(x, y)`.
    pub fn pixel_direction_detector(&self, x: usize, y: usize) -> Vector3<f64> {
        let center = self.params.n_pmt_across as f64 / 2.0;
        let a = self.params.angular_size * (x as f64 - center);
        let b = self.params.angular_size * (y as f64 - center);
        Vector3::new(b.cos() * a.sin(), b.sin(), b.cos() * a.cos())
    }

    /// World-frame view direction of pixel `(x, y)`.
    pub fn pixel_direction_world(&self, x: usize, y: usize) -> Vector3<f64> {
        self.rot_to_world * self.pixel_direction_detector(x, y)
    }

    /// World-frame view direction of the iterator's current pixel.
    pub fn direction(&self, iter: &SignalIterator) -> Vector3<f64> {
        self.pixel_direction_world(iter.x(), iter.y())
    }

    /// Pixel indices viewing along the detector-frame direction, or
    /// None if the direction falls outside the camera disk.
    pub fn pixel_for_direction(&self, direction: &Vector3<f64>) -> Option<(usize, usize)> {
        let d = direction.normalize();
        let b = d.y.clamp(-1.0, 1.0).asin();
        let a = d.x.atan2(d.z);
        let center = self.params.n_pmt_across as f64 / 2.0;
        let x = (a / self.params.angular_size + center).round();
        let y = (b / self.params.angular_size + center).round();
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if self.valid(x, y) {
            Some((x, y))
        } else {
            None
        }
    }

    /// Deposit `weight` photons arriving at `time` from the
    /// detector-frame view direction `direction`. Arrivals outside the
    /// camera disk or the time window are dropped silently.
    pub fn add_photon(&mut self, time: f64, direction: &Vector3<f64>, weight: i64) {
        if time < self.params.start_time || time > self.params.max_time || weight <= 0 {
            return;
        }
        let Some((x, y)) = self.pixel_for_direction(direction) else {
            return;
        };
        let bin = ((time - self.params.start_time) / self.params.bin_width) as usize;
        if bin >= self.n_bins {
            return;
        }
        let idx = self.index(x, y);
        let series = &mut self.counts[idx];
        if series.len() <= bin {
            series.resize(bin + 1, 0);
        }
        series[bin] += weight;
    }

    /// Expected noise photons per bin for a background `rate` in
    /// photons / (s · sr · cm²).
    pub fn noise_mean_bin(&self, rate: f64) -> f64 {
        rate * self.pixel_solid_angle() * self.params.aperture_area * self.params.bin_width
    }

    /// Add Poisson background to the iterator's pixel: a single draw
    /// with mean `rate · ΔΩ · A · T`, scattered uniformly over the bins.
    pub fn add_noise(&mut self, rate: f64, iter: &SignalIterator, rng: &mut StdRng) {
        let mean = self.noise_mean_bin(rate) * self.n_bins as f64;
        if mean <= 0.0 {
            return;
        }
        let poisson = Poisson::new(mean).expect("noise mean must be positive and finite");
        let draws = poisson.sample(rng) as u64;
        let n_bins = self.n_bins;
        let idx = self.index(iter.x(), iter.y());
        let series = &mut self.counts[idx];
        if series.len() < n_bins {
            series.resize(n_bins, 0);
        }
        for _ in 0..draws {
            let bin = rng.gen_range(0..n_bins);
            series[bin] += 1;
        }
    }

    /// Subtract the expected per-bin background from the iterator's
    /// pixel, clamping at zero. The subtrahend is rounded up so a bin
    /// holding exactly the mean goes to zero.
    pub fn subtract_noise(&mut self, rate: f64, iter: &SignalIterator) {
        let sub = self.noise_mean_bin(rate).ceil() as i64;
        if sub <= 0 {
            return;
        }
        let idx = self.index(iter.x(), iter.y());
        for count in &mut self.counts[idx] {
            *count = (*count - sub).max(0);
        }
    }

    /// Zero every bin of the iterator's pixel strictly below
    /// `threshold` counts.
    pub fn erase_below(&mut self, threshold: f64, iter: &SignalIterator) {
        let idx = self.index(iter.x(), iter.y());
        for count in &mut self.counts[idx] {
            if (*count as f64) < threshold {
                *count = 0;
            }
        }
    }

    /// Per-bin flags for counts strictly above `threshold`, padded to
    /// the full record length.
    pub fn above_threshold(&self, threshold: f64, iter: &SignalIterator) -> Vec<bool> {
        let series = self.counts(iter.x(), iter.y());
        (0..self.n_bins)
            .map(|i| series.get(i).map_or(false, |&c| (c as f64) > threshold))
            .collect()
    }

    /// Integer sum over the iterator's pixel series.
    pub fn sum_bins(&self, iter: &SignalIterator) -> i64 {
        self.counts(iter.x(), iter.y()).iter().sum()
    }

    /// Zero every cell not flagged in `keep` (dimensions
    /// `(n, n, n_bins)`). Used by the flood-fill retention stage.
    pub fn retain(&mut self, keep: &Array3<bool>) {
        let n = self.params.n_pmt_across;
        for x in 0..n {
            for y in 0..n {
                let idx = self.index(x, y);
                for (t, count) in self.counts[idx].iter_mut().enumerate() {
                    if !keep[[x, y, t]] {
                        *count = 0;
                    }
                }
            }
        }
    }

    /// Total counts per time bin, over all pixels.
    pub fn time_profile(&self) -> Vec<i64> {
        let mut profile = vec![0i64; self.n_bins];
        for series in &self.counts {
            for (i, &c) in series.iter().enumerate() {
                profile[i] += c;
            }
        }
        profile
    }

    /// Per-pixel summed counts as a 2-D map; invalid pixels stay zero.
    pub fn sum_map(&self) -> Array2<i64> {
        let n = self.params.n_pmt_across;
        Array2::from_shape_fn((n, n), |(x, y)| self.counts[x * n + y].iter().sum())
    }

    /// Dump header for external persistence.
    pub fn dump_header(&self) -> DumpHeader {
        DumpHeader {
            n_pmt_across: self.params.n_pmt_across,
            start_time: self.params.start_time,
            bin_width: self.params.bin_width,
            angular_size: self.params.angular_size,
        }
    }

    /// Per-valid-pixel dump records, in iterator order.
    pub fn pixel_records(&self) -> impl Iterator<Item = PixelRecord<'_>> {
        let n = self.params.n_pmt_across;
        (0..n).flat_map(move |x| {
            (0..n).filter_map(move |y| {
                if self.valid[[x, y]] {
                    Some(PixelRecord {
                        x,
                        y,
                        counts: self.counts(x, y),
                    })
                } else {
                    None
                }
            })
        })
    }
}
