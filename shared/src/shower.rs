//! The shower value type.
//!
//! A shower is a ray (the front of the cascade moving at the speed of
//! light) plus its origin and a longitudinal intensity profile. The
//! profile is a tagged variant rather than a trait object: the pipeline
//! only ever needs the Gaisser-Hillas form and a constant form for
//! synthetic tests.

use nalgebra::Vector3;

use crate::geometry::{Plane, Ray, LIGHT_SPEED};

/// Longitudinal intensity profile of a shower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Profile {
    /// A fixed number of charged particles, for synthetic inputs.
    Constant { size: f64 },
    /// Gaisser-Hillas with the first interaction at depth zero:
    /// `N(X) = n_max · (X/x_max)^(x_max/λ) · exp((x_max − X)/λ)`.
    GaisserHillas { n_max: f64, x_max: f64, lambda: f64 },
}

impl Profile {
    /// Number of charged particles at slant depth `depth`.
    pub fn size(&self, depth: f64) -> f64 {
        match *self {
            Profile::Constant { size } => size,
            Profile::GaisserHillas {
                n_max,
                x_max,
                lambda,
            } => {
                if depth <= 0.0 {
                    return 0.0;
                }
                let ratio = depth / x_max;
                n_max * ratio.powf(x_max / lambda) * ((x_max - depth) / lambda).exp()
            }
        }
    }

    /// Depth of maximum, where defined.
    pub fn x_max(&self) -> Option<f64> {
        match *self {
            Profile::Constant { .. } => None,
            Profile::GaisserHillas { x_max, .. } => Some(x_max),
        }
    }

    /// Size at maximum, where defined.
    pub fn n_max(&self) -> Option<f64> {
        match *self {
            Profile::Constant { .. } => None,
            Profile::GaisserHillas { n_max, .. } => Some(n_max),
        }
    }
}

/// A cosmic-ray air shower: front position and velocity, origin, primary
/// energy, and longitudinal profile. The axis direction never changes
/// after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Shower {
    ray: Ray,
    start_time: f64,
    start_position: Vector3<f64>,
    energy: Option<f64>,
    profile: Profile,
}

impl Shower {
    /// A generated shower with known energy and profile.
    pub fn new(
        time: f64,
        position: Vector3<f64>,
        direction: Vector3<f64>,
        energy: f64,
        profile: Profile,
    ) -> Self {
        Self {
            ray: Ray::new(time, position, direction, LIGHT_SPEED),
            start_time: time,
            start_position: position,
            energy: Some(energy),
            profile,
        }
    }

    /// A geometry-only shower, as produced by reconstruction: no energy
    /// or profile information.
    pub fn geometry(time: f64, position: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self {
            ray: Ray::new(time, position, direction, LIGHT_SPEED),
            start_time: time,
            start_position: position,
            energy: None,
            profile: Profile::Constant { size: 1.0 },
        }
    }

    /// The invalid-reconstruction sentinel: a shower through the origin,
    /// so its impact parameter is zero.
    pub fn sentinel() -> Self {
        Self::geometry(0.0, Vector3::zeros(), -Vector3::z())
    }

    pub fn time(&self) -> f64 {
        self.ray.time()
    }

    pub fn position(&self) -> Vector3<f64> {
        self.ray.position()
    }

    /// Unit axis direction (direction of propagation).
    pub fn direction(&self) -> Vector3<f64> {
        self.ray.direction()
    }

    /// Front velocity (the axis direction at the speed of light).
    pub fn velocity(&self) -> Vector3<f64> {
        self.ray.velocity()
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn start_position(&self) -> Vector3<f64> {
        self.start_position
    }

    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Advance the front by `dt` seconds.
    pub fn increment_position(&mut self, dt: f64) {
        self.ray.increment_position(dt);
    }

    /// Signed time until the front reaches `plane`.
    pub fn time_to_plane(&self, plane: &Plane) -> f64 {
        self.ray.time_to_plane(plane)
    }

    /// Shower age `s = 3X / (X + 2·Xmax)` at slant depth `depth`; 1 for
    /// profiles without a maximum.
    pub fn age(&self, depth: f64) -> f64 {
        match self.profile.x_max() {
            Some(x_max) => 3.0 * depth / (depth + 2.0 * x_max),
            None => 1.0,
        }
    }

    /// Distance of closest approach of the axis to the world origin.
    pub fn impact_param(&self) -> f64 {
        self.ray.position().cross(&self.ray.direction()).norm()
    }

    /// Point of closest approach of the axis to the world origin.
    pub fn closest_approach(&self) -> Vector3<f64> {
        let p = self.ray.position();
        let d = self.ray.direction();
        p - p.dot(&d) * d
    }

    /// A reconstruction is valid when the fitted axis misses the
    /// detector: the sentinel has impact parameter zero.
    pub fn is_valid(&self) -> bool {
        self.impact_param() > 0.0
    }

    /// CSV header matching [`Shower::to_row`].
    pub fn header() -> &'static str {
        "t0,x0,y0,z0,vx,vy,vz,energy,x_max,n_max"
    }

    /// CSV row `(t₀, x₀, v̂, E, Xmax, Nmax)`; absent values render as nan.
    pub fn to_row(&self) -> String {
        let p = self.start_position;
        let d = self.ray.direction();
        format!(
            "{:e},{:e},{:e},{:e},{:.6},{:.6},{:.6},{:e},{:e},{:e}",
            self.start_time,
            p.x,
            p.y,
            p.z,
            d.x,
            d.y,
            d.z,
            self.energy.unwrap_or(f64::NAN),
            self.profile.x_max().unwrap_or(f64::NAN),
            self.profile.n_max().unwrap_or(f64::NAN),
        )
    }
}
