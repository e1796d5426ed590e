use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Rigid transformation whose x-axis is `ex`, whose xy-plane contains `ey`, and whose origin is
/// `translation`. `ey` is orthogonalized against `ex` before use.
pub fn make_rigid_transformation(
    ex: &Vector3<f64>,
    ey: &Vector3<f64>,
    translation: &Vector3<f64>,
) -> Isometry3<f64> {
    let ex = ex.normalize();
    let ey = (ey - ex * ex.dot(ey)).normalize();
    let ez = ex.cross(&ey);
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[ex, ey, ez]));

    Isometry3::from_parts(
        Translation3::from(*translation),
        UnitQuaternion::from_rotation_matrix(&rotation),
    )
}

/// Frame built the same way as `Rigid::from_3_points`: origin on `origin`, x-axis pointing from
/// `neg_x` towards `origin`, `xy_plane` in the positive half of the xy-plane.
pub fn frame_from_3_points(
    neg_x: &Point3<f64>,
    origin: &Point3<f64>,
    xy_plane: &Point3<f64>,
) -> Isometry3<f64> {
    make_rigid_transformation(&(origin - neg_x), &(xy_plane - origin), &origin.coords)
}

/// Frame whose x-axis runs along the bond `axis_start -> axis_end`, with `reference` in the
/// xy-plane and the origin on `axis_end`. Rotating about its x-axis is a torsion about the bond.
pub fn torsion_frame(
    axis_start: &Point3<f64>,
    axis_end: &Point3<f64>,
    reference: &Point3<f64>,
) -> Isometry3<f64> {
    make_rigid_transformation(
        &(axis_end - axis_start),
        &(reference - axis_start),
        &axis_end.coords,
    )
}

/// Row-major 4x4 homogeneous matrix, as stored in the constant tables.
pub fn to_homogeneous_rows(transform: &Isometry3<f64>) -> [[f64; 4]; 4] {
    let m = transform.to_homogeneous();
    let mut rows = [[0.0; 4]; 4];
    for (i, row) in rows.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = m[(i, j)];
        }
    }
    rows
}
