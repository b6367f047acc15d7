//! Schmidt telescope ray tracing.
//!
//! Detector-frame geometry: the aperture stop and thin corrector plate
//! lie in the z = 0 plane centered on the origin, which is also the
//! center of curvature of the spherical primary mirror. The mirror
//! occupies the negative-z half of the sphere `|p| = mirror_radius`;
//! the focal surface is the half-radius sphere, and the photomultiplier
//! cluster is a disk of diameter `pmtclust_size` around `(0, 0, −R/2)`.
//! Light enters downward through the stop, reflects from the mirror,
//! and lands on the focal surface.
//!
//! Every stage returns `Option`/`bool`: a miss drops the photon and the
//! caller moves on.

use nalgebra::{Rotation3, Unit, Vector3};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::TAU;

use shared::config::DetectorConfig;
use shared::geometry::Ray;

/// Largest corrector deflection considered physical (rad).
const MAX_DEFLECTION: f64 = 0.5;

/// Ray tracing geometry of one Schmidt telescope.
#[derive(Debug, Clone)]
pub struct SchmidtOptics {
    mirror_radius: f64,
    stop_radius: f64,
    mirror_disk_radius: f64,
    cluster_radius: f64,
    corrector_strength: f64,
}

impl SchmidtOptics {
    pub fn new(detector: &DetectorConfig) -> Self {
        Self {
            mirror_radius: detector.mirror_radius,
            stop_radius: detector.stop_diameter / 2.0,
            mirror_disk_radius: detector.mainmirr_size / 2.0,
            cluster_radius: detector.pmtclust_size / 2.0,
            corrector_strength: detector.corrector_strength,
        }
    }

    pub fn stop_radius(&self) -> f64 {
        self.stop_radius
    }

    /// Focal surface radius (half the mirror radius).
    pub fn focal_radius(&self) -> f64 {
        self.mirror_radius / 2.0
    }

    /// Uniform random point on the stop disk.
    pub fn random_stop_impact(&self, rng: &mut StdRng) -> Vector3<f64> {
        let r = self.stop_radius * rng.gen::<f64>().sqrt();
        let phi = rng.gen::<f64>() * TAU;
        Vector3::new(r * phi.cos(), r * phi.sin(), 0.0)
    }

    /// Fraction of a sphere the stop subtends from `view_point`
    /// (detector frame): `A_stop · cos φ / (4π r²)` with `φ` the angle
    /// between the direction to the detector and the stop normal.
    pub fn sphere_fraction(&self, view_point: &Vector3<f64>) -> f64 {
        let r_sq = view_point.norm_squared();
        if r_sq == 0.0 {
            return 0.0;
        }
        let cos_phi = (-view_point.normalize()).z.max(0.0);
        let area = std::f64::consts::PI * self.stop_radius * self.stop_radius;
        area * cos_phi / (4.0 * std::f64::consts::PI * r_sq)
    }

    /// Thin Schmidt corrector: an outward radial angular kick
    /// proportional to r³, canceling the mirror's spherical aberration
    /// to first order. Returns false when the deflection leaves the
    /// physical regime.
    pub fn deflect_from_lens(&self, photon: &mut Ray) -> bool {
        let p = photon.position();
        let r = (p.x * p.x + p.y * p.y).sqrt();
        if r > self.stop_radius * (1.0 + 1e-9) {
            return false;
        }
        if r == 0.0 {
            return true;
        }
        let deflection = self.corrector_strength * r.powi(3) / self.mirror_radius.powi(3);
        if !deflection.is_finite() || deflection > MAX_DEFLECTION {
            return false;
        }
        let radial = Vector3::new(p.x / r, p.y / r, 0.0);
        let axis = Unit::new_normalize(radial.cross(&Vector3::z()));
        let rot = Rotation3::from_axis_angle(&axis, deflection);
        photon.set_direction(rot * photon.direction());
        true
    }

    /// Intersection of `ray` with the sphere `|p| = radius`, picking
    /// the candidate with the smallest z. None when the ray misses.
    fn neg_sphere_impact(ray: &Ray, radius: f64) -> Option<Vector3<f64>> {
        let p = ray.position();
        let v = ray.velocity();
        let a = v.norm_squared();
        let b = 2.0 * p.dot(&v);
        let c = p.norm_squared() - radius * radius;
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 || a == 0.0 {
            return None;
        }
        let sqrt_disc = disc.sqrt();
        let first = p + v * ((-b - sqrt_disc) / (2.0 * a));
        let second = p + v * ((-b + sqrt_disc) / (2.0 * a));
        Some(if first.z <= second.z { first } else { second })
    }

    /// Point where the refracted photon strikes the mirror, or None if
    /// it misses the mirror disk.
    pub fn mirror_impact_point(&self, photon: &Ray) -> Option<Vector3<f64>> {
        let point = Self::neg_sphere_impact(photon, self.mirror_radius)?;
        let transverse = (point.x * point.x + point.y * point.y).sqrt();
        (transverse <= self.mirror_disk_radius && point.z < 0.0).then_some(point)
    }

    /// Inward mirror normal at `point` on the sphere.
    pub fn mirror_normal(point: &Vector3<f64>) -> Vector3<f64> {
        -point.normalize()
    }

    /// Whether the straight segment from `start` to `end` crosses the
    /// camera cluster disk at the focal surface.
    pub fn blocked_by_camera(&self, start: &Vector3<f64>, end: &Vector3<f64>) -> bool {
        let focal_z = -self.focal_radius();
        let dz = end.z - start.z;
        if dz == 0.0 {
            return false;
        }
        let s = (focal_z - start.z) / dz;
        if !(0.0..=1.0).contains(&s) {
            return false;
        }
        let crossing = start + (end - start) * s;
        (crossing.x * crossing.x + crossing.y * crossing.y).sqrt() < self.cluster_radius
    }

    /// Point where the reflected photon lands on the focal surface, or
    /// None if it misses the camera cluster.
    pub fn camera_impact_point(&self, photon: &Ray) -> Option<Vector3<f64>> {
        let point = Self::neg_sphere_impact(photon, self.focal_radius())?;
        let transverse = (point.x * point.x + point.y * point.y).sqrt();
        (transverse <= self.cluster_radius && point.z < 0.0).then_some(point)
    }
}

/// Reference detector geometries.
pub mod models {
    use super::*;
    use shared::config::GroundReflection;

    /// The workhorse geometry used throughout the tests: 6 m radius of
    /// curvature, 2 m stop, 50-pixel camera with 8 mrad pixels.
    pub static REFERENCE: Lazy<DetectorConfig> = Lazy::new(DetectorConfig::default);

    /// A small camera for fast synthetic tests.
    pub static COMPACT: Lazy<DetectorConfig> = Lazy::new(|| DetectorConfig {
        mirror_radius: 300.0,
        stop_diameter: 100.0,
        mainmirr_size: 260.0,
        pmtclust_size: 70.0,
        n_pmt_across: 20,
        pmt_angular_size: 0.01,
        pmt_linear_size: 1.5,
        elevation_angle: 0.1,
        detector_altitude: 1.5e5,
        quantum_eff: 0.85,
        mirror_reflect: 0.90,
        filter_transmit: 0.85,
        corrector_strength: 1.0,
        check_back_collision: true,
        ground_reflection: GroundReflection::Lambertian,
        ground_normal: [0.0, 0.0, 1.0],
        ground_point: [0.0, 0.0, -1.0e5],
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn optics() -> SchmidtOptics {
        SchmidtOptics::new(&models::REFERENCE)
    }

    #[test]
    fn test_stop_impacts_on_disk() {
        let optics = optics();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..256 {
            let p = optics.random_stop_impact(&mut rng);
            assert_eq!(p.z, 0.0);
            assert!(p.norm() <= optics.stop_radius());
        }
    }

    #[test]
    fn test_mirror_impact_on_sphere() {
        let optics = optics();
        let photon = Ray::photon(
            0.0,
            Vector3::new(80.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
        );
        let point = optics.mirror_impact_point(&photon).unwrap();
        assert_relative_eq!(point.norm(), 600.0, epsilon = 1e-9);
        assert!(point.z < 0.0);
        assert_relative_eq!(point.x, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mirror_miss_off_disk() {
        let optics = optics();
        // A nearly horizontal ray exits past the mirror rim.
        let photon = Ray::photon(
            0.0,
            Vector3::new(90.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, -0.05),
        );
        assert!(optics.mirror_impact_point(&photon).is_none());
    }

    #[test]
    fn test_axial_ray_blocked_by_camera() {
        let optics = optics();
        let start = Vector3::new(10.0, 0.0, 0.0);
        let end = Vector3::new(10.0, 0.0, -599.9);
        assert!(optics.blocked_by_camera(&start, &end));

        let start = Vector3::new(95.0, 0.0, 0.0);
        let end = Vector3::new(95.0, 0.0, -592.4);
        assert!(!optics.blocked_by_camera(&start, &end));
    }

    #[test]
    fn test_focus_lands_near_axis_image() {
        // An off-center axial ray must focus near (0, 0, −R/2): the
        // image of the straight-down view direction.
        let optics = optics();
        let mut photon = Ray::photon(
            0.0,
            Vector3::new(80.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
        );
        assert!(optics.deflect_from_lens(&mut photon));
        let mirror = optics.mirror_impact_point(&photon).unwrap();
        photon.propagate_to_point(mirror);
        photon.reflect(SchmidtOptics::mirror_normal(&mirror));
        let camera = optics.camera_impact_point(&photon).unwrap();
        assert_relative_eq!(camera.norm(), 300.0, epsilon = 1e-9);
        // Within a pixel of the on-axis image point.
        let miss = (camera - Vector3::new(0.0, 0.0, -300.0)).norm();
        assert!(miss < 2.4, "aberration {miss} cm");
    }

    #[test]
    fn test_corrector_kick_grows_with_radius() {
        let optics = optics();
        let mut inner = Ray::photon(
            0.0,
            Vector3::new(20.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
        );
        let mut outer = Ray::photon(
            0.0,
            Vector3::new(90.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
        );
        assert!(optics.deflect_from_lens(&mut inner));
        assert!(optics.deflect_from_lens(&mut outer));
        let tilt_inner = inner.direction().x;
        let tilt_outer = outer.direction().x;
        // Outward tilt, increasing with radius.
        assert!(tilt_inner > 0.0);
        assert!(tilt_outer > tilt_inner);
    }

    #[test]
    fn test_sphere_fraction_inverse_square() {
        let optics = optics();
        let near = optics.sphere_fraction(&Vector3::new(0.0, 0.0, 1.0e5));
        let far = optics.sphere_fraction(&Vector3::new(0.0, 0.0, 2.0e5));
        assert_relative_eq!(near / far, 4.0, epsilon = 1e-9);
        // Edge-on view sees no aperture.
        assert_eq!(optics.sphere_fraction(&Vector3::new(1.0e5, 0.0, 0.0)), 0.0);
    }
}
