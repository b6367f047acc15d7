//! Exponential model atmosphere.
//!
//! Density falls off as `ρ(h) = ρ_sea · exp(−h/H)` with heights measured
//! above sea level; the refractivity `δ = n − 1` tracks the density. The
//! vertical depth (grams per square centimeter of overburden) is the
//! integral of the density from `h` to infinity, which for the
//! exponential profile is simply `ρ(h) · H`.

use crate::config::AtmosphereConfig;

/// Density and refractivity profile used by the Monte Carlo generator
/// and the simulator.
#[derive(Debug, Clone, Copy)]
pub struct Atmosphere {
    scale_height: f64,
    rho_sea: f64,
    delta_sea: f64,
}

impl Atmosphere {
    pub fn new(config: &AtmosphereConfig) -> Self {
        Self {
            scale_height: config.scale_height,
            rho_sea: config.rho_sea,
            delta_sea: config.refrac_sea - 1.0,
        }
    }

    /// Local density in g/cm³ at height `h` cm above sea level.
    pub fn density(&self, h: f64) -> f64 {
        self.rho_sea * (-h / self.scale_height).exp()
    }

    /// Local refractivity `n − 1` at height `h`.
    pub fn delta(&self, h: f64) -> f64 {
        self.delta_sea * (-h / self.scale_height).exp()
    }

    /// Vertical atmospheric depth in g/cm² above height `h`.
    pub fn vertical_depth(&self, h: f64) -> f64 {
        self.density(h) * self.scale_height
    }

    /// Height at which the vertical depth equals `depth`. The inverse of
    /// [`Atmosphere::vertical_depth`].
    pub fn height_for_depth(&self, depth: f64) -> f64 {
        let surface_depth = self.rho_sea * self.scale_height;
        -self.scale_height * (depth / surface_depth).ln()
    }
}
