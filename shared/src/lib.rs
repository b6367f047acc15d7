//! Common building blocks for the air shower simulation and reconstruction
//! pipeline.
//!
//! This crate holds everything both the forward simulator and the
//! reconstructor need to agree on:
//!
//! - **Geometry**: rays, planes, and the detector elevation rotation
//!   ([`geometry`]).
//! - **Atmosphere**: the exponential density/refractivity profile and
//!   depth/height conversions ([`atmosphere`]).
//! - **Showers**: the shower value type with its longitudinal profile
//!   ([`shower`]).
//! - **Photon counts**: the pixelated, time-binned photon record produced
//!   by the simulator and consumed by the reconstructor ([`photon_count`]).
//! - **Configuration**: plain-data parameter structs with validation
//!   ([`config`]).
//!
//! All quantities are cgs (centimeters, seconds, grams) with energies in
//! eV for primaries and MeV for electron spectra.

pub mod atmosphere;
pub mod config;
pub mod geometry;
pub mod photon_count;
pub mod shower;

pub use atmosphere::Atmosphere;
pub use config::{Config, ConfigError};
pub use geometry::{Plane, Ray};
pub use photon_count::{PhotonCount, SignalIterator};
pub use shower::{Profile, Shower};
