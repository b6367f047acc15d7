//! Shower-detector plane fit.
//!
//! The SDP normal minimizes the count-weighted sum of squared
//! projections of the pixel view directions: the eigenvector of
//! `M = Σ wᵢ dᵢ dᵢᵀ` with the smallest eigenvalue. The returned
//! rotation maps world coordinates into a plane frame whose z-axis is
//! the normal, whose x-axis lies in the world horizontal plane, and
//! whose y-axis points into the upper half space.

use nalgebra::{Matrix3, Rotation3, SymmetricEigen, Vector3};
use ndarray::Array3;

use shared::photon_count::PhotonCount;

/// Eigenvector of the smallest eigenvalue; ties resolve to the
/// smallest index.
fn min_eigenvector(matrix: Matrix3<f64>) -> Vector3<f64> {
    let eigen = SymmetricEigen::new(matrix);
    let mut min_index = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_index] {
            min_index = i;
        }
    }
    eigen.eigenvectors.column(min_index).into_owned()
}

/// Rotation into the plane frame of the given normal. None when the
/// normal is degenerate (vertical planes only: an SDP always contains
/// the detector's horizontal neighborhood, so a normal parallel to
/// world z means the fit had no signal).
pub(crate) fn plane_rotation(normal: Vector3<f64>) -> Option<Rotation3<f64>> {
    let norm = normal.norm();
    if !(norm.is_finite()) || norm < 1e-12 {
        return None;
    }
    let mut n = normal / norm;
    let x_axis = Vector3::z().cross(&n);
    if x_axis.norm() < 1e-9 {
        return None;
    }
    let x_axis = x_axis.normalize();
    let mut y_axis = n.cross(&x_axis);
    // Canonical orientation: in-plane y points upward.
    if y_axis.z < 0.0 {
        y_axis = -y_axis;
        n = -n;
    }
    Some(Rotation3::from_matrix_unchecked(Matrix3::from_rows(&[
        x_axis.transpose(),
        y_axis.transpose(),
        n.transpose(),
    ])))
}

/// Fit the shower-detector plane from the cube's counts, optionally
/// restricted to the cells flagged in `mask`. Returns the world-to-
/// plane rotation, or None when the weighted matrix is degenerate.
pub(crate) fn fit_sd_plane(
    data: &PhotonCount,
    mask: Option<&Array3<bool>>,
) -> Option<Rotation3<f64>> {
    let mut matrix = Matrix3::zeros();
    let mut total_weight = 0i64;
    let mut iter = data.iterator();
    while iter.next() {
        let weight = match mask {
            None => data.sum_bins(&iter),
            Some(mask) => data
                .counts(iter.x(), iter.y())
                .iter()
                .enumerate()
                .filter(|&(t, _)| mask[[iter.x(), iter.y(), t]])
                .map(|(_, &c)| c)
                .sum(),
        };
        if weight <= 0 {
            continue;
        }
        total_weight += weight;
        let direction = data.direction(&iter);
        matrix += direction * direction.transpose() * weight as f64;
    }
    if total_weight == 0 {
        return None;
    }
    plane_rotation(min_eigenvector(matrix))
}

/// Angular distance of `direction` from the plane with the given
/// world-to-plane rotation.
pub(crate) fn plane_distance(to_plane: &Rotation3<f64>, direction: &Vector3<f64>) -> f64 {
    let in_plane = to_plane * direction;
    (in_plane.z / direction.norm()).clamp(-1.0, 1.0).abs().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_min_eigenvector_diagonal() {
        let matrix = Matrix3::from_diagonal(&Vector3::new(3.0, 0.5, 2.0));
        let v = min_eigenvector(matrix);
        // Smallest eigenvalue 0.5 belongs to the y axis.
        assert_relative_eq!(v.y.abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_min_eigenvector_tie_breaks_low_index() {
        let matrix = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 2.0));
        let v = min_eigenvector(matrix);
        // Degenerate pair: any unit vector in the xy eigenplane is
        // acceptable, but it must not leak into z.
        assert_relative_eq!(v.z, 0.0, epsilon = 1e-9);
        assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_plane_rotation_orthonormal_and_canonical() {
        let rot = plane_rotation(Vector3::new(0.3, -0.8, 0.2)).unwrap();
        let m = rot.matrix();
        // Rows are the plane basis expressed in world coordinates.
        let x = m.row(0).transpose();
        let y = m.row(1).transpose();
        let n = m.row(2).transpose();
        assert_relative_eq!(x.dot(&y), 0.0, epsilon = 1e-12);
        assert_relative_eq!(x.dot(&n), 0.0, epsilon = 1e-12);
        assert_relative_eq!(x.z, 0.0, epsilon = 1e-12);
        assert!(y.z >= 0.0);
        assert_relative_eq!(x.cross(&y).dot(&n), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vertical_normal_rejected() {
        assert!(plane_rotation(Vector3::z()).is_none());
        assert!(plane_rotation(Vector3::zeros()).is_none());
    }

    #[test]
    fn test_plane_distance() {
        let rot = plane_rotation(Vector3::x()).unwrap();
        // A direction in the yz plane has zero distance.
        let in_plane = Vector3::new(0.0, 0.7, 0.3).normalize();
        assert_relative_eq!(plane_distance(&rot, &in_plane), 0.0, epsilon = 1e-12);
        // The normal itself is π/2 away.
        assert_relative_eq!(
            plane_distance(&rot, &Vector3::x()),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
    }
}
