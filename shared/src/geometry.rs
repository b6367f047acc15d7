//! Geometric primitives shared by the simulator and reconstructor.
//!
//! Positions are world- or detector-frame cartesian vectors in
//! centimeters. The detector sits at the origin of both frames; the two
//! frames differ by the elevation rotation built with [`make_rotation`].
//! Rays carry an absolute time in seconds and a velocity whose magnitude
//! is the propagation speed (the speed of light for photons).

use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{Rotation3, Unit, Vector3};
use rand::rngs::StdRng;
use rand::Rng;

/// Speed of light in cm/s.
pub const LIGHT_SPEED: f64 = 2.99792458e10;

/// An infinite plane `n · x = d` with unit normal `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    normal: Vector3<f64>,
    coefficient: f64,
}

impl Plane {
    /// Construct the plane through `point` with the given normal
    /// direction. The normal is normalized on construction.
    pub fn new(normal: Vector3<f64>, point: Vector3<f64>) -> Self {
        let normal = normal.normalize();
        Self {
            coefficient: normal.dot(&point),
            normal,
        }
    }

    pub fn normal(&self) -> Vector3<f64> {
        self.normal
    }

    /// The scalar offset `d` in `n · x = d`.
    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    /// Signed distance from `point` to the plane along the normal.
    pub fn distance(&self, point: &Vector3<f64>) -> f64 {
        self.normal.dot(point) - self.coefficient
    }

    /// The plane expressed in a rotated frame: `x_new = rot * x_old`.
    pub fn rotated(&self, rot: &Rotation3<f64>) -> Self {
        Self {
            normal: rot * self.normal,
            coefficient: self.coefficient,
        }
    }
}

/// A point moving in a straight line: `(time, position, velocity)`.
///
/// The velocity magnitude is fixed at construction (the speed of light
/// for photons, the shower front speed for showers) and is preserved by
/// every operation, including [`Ray::reflect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ray {
    time: f64,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
}

impl Ray {
    /// Construct a ray with an explicit speed. `direction` only
    /// contributes its orientation.
    pub fn new(time: f64, position: Vector3<f64>, direction: Vector3<f64>, speed: f64) -> Self {
        Self {
            time,
            position,
            velocity: direction.normalize() * speed,
        }
    }

    /// A ray moving at the speed of light.
    pub fn photon(time: f64, position: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self::new(time, position, direction, LIGHT_SPEED)
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }

    /// Unit direction of travel.
    pub fn direction(&self) -> Vector3<f64> {
        self.velocity.normalize()
    }

    /// Re-orient the velocity without changing the speed.
    pub fn set_direction(&mut self, direction: Vector3<f64>) {
        let speed = self.velocity.norm();
        self.velocity = direction.normalize() * speed;
    }

    /// Advance (or rewind, for negative `dt`) the ray by `dt` seconds.
    pub fn increment_position(&mut self, dt: f64) {
        self.position += self.velocity * dt;
        self.time += dt;
    }

    /// Signed time until the ray crosses `plane`. Negative if the
    /// intersection is behind the ray, infinite if the ray is parallel
    /// to the plane.
    pub fn time_to_plane(&self, plane: &Plane) -> f64 {
        let speed_normal = plane.normal().dot(&self.velocity);
        if speed_normal == 0.0 {
            return f64::INFINITY;
        }
        -plane.distance(&self.position) / speed_normal
    }

    /// Move the ray onto `plane`. A parallel plane leaves the ray
    /// untouched.
    pub fn propagate_to_plane(&mut self, plane: &Plane) {
        let dt = self.time_to_plane(plane);
        if dt.is_finite() {
            self.increment_position(dt);
        }
    }

    /// Point the ray at `point` and advance it there.
    pub fn propagate_to_point(&mut self, point: Vector3<f64>) {
        let offset = point - self.position;
        let distance = offset.norm();
        if distance == 0.0 {
            return;
        }
        self.set_direction(offset);
        let speed = self.velocity.norm();
        self.increment_position(distance / speed);
    }

    /// Specular reflection about `normal`: `v ↦ v − 2 (v · n̂) n̂`.
    pub fn reflect(&mut self, normal: Vector3<f64>) {
        let n = normal.normalize();
        self.velocity -= 2.0 * self.velocity.dot(&n) * n;
    }

    /// The same ray expressed in a rotated frame: `x_new = rot * x_old`.
    pub fn transformed(&self, rot: &Rotation3<f64>) -> Self {
        Self {
            time: self.time,
            position: rot * self.position,
            velocity: rot * self.velocity,
        }
    }
}

/// Detector-to-world rotation for a telescope pointed at `elevation`
/// radians above the horizon.
///
/// The detector frame has its optical axis along +z; the rotation maps
/// that axis to `(0, cos e, sin e)` in world coordinates, so elevation
/// zero looks along +y at the horizon and π/2 at the zenith.
pub fn make_rotation(elevation: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::x_axis(), elevation - FRAC_PI_2)
}

/// A unit vector uniformly distributed on the circle of directions
/// normal to `axis`. A zero axis yields the canonical x-axis.
pub fn rand_normal(axis: &Vector3<f64>, rng: &mut StdRng) -> Vector3<f64> {
    if axis.norm() == 0.0 {
        return Vector3::x();
    }
    normal_at_angle(axis, rng.gen::<f64>() * TAU)
}

/// The unit vector normal to `axis` at angle `angle` around it.
///
/// The zero-angle reference is the projection of world +y onto the
/// normal plane (falling back to +x when the axis is parallel to +y),
/// so callers get a deterministic, axis-independent parameterization.
pub fn normal_at_angle(axis: &Vector3<f64>, angle: f64) -> Vector3<f64> {
    let axis = Unit::new_normalize(*axis);
    let reference = Vector3::y();
    let mut base = reference - axis.dot(&reference) * axis.into_inner();
    if base.norm() < 1e-9 {
        let reference = Vector3::x();
        base = reference - axis.dot(&reference) * axis.into_inner();
    }
    let base = base.normalize();
    Rotation3::from_axis_angle(&axis, angle) * base
}

/// Round `value` to a neighboring integer with probability equal to the
/// fractional part, preserving the expectation. Used by the thinning
/// loops, which need integer photon counts.
pub fn random_round(value: f64, rng: &mut StdRng) -> i64 {
    if value <= 0.0 {
        return 0;
    }
    let base = value.floor();
    let fraction = value - base;
    base as i64 + i64::from(rng.gen::<f64>() < fraction)
}
