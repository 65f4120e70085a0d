//! Conversion of runtime matrices into glam's column-major layout

use glam::{Mat4, Vec4};

/// Row-major 3x4 affine matrix to `Mat4`, bottom row `0 0 0 1`
pub fn mat34_to_mat4(m: &[[f32; 4]; 3]) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(m[0][0], m[1][0], m[2][0], 0.0),
        Vec4::new(m[0][1], m[1][1], m[2][1], 0.0),
        Vec4::new(m[0][2], m[1][2], m[2][2], 0.0),
        Vec4::new(m[0][3], m[1][3], m[2][3], 1.0),
    )
}

/// Row-major 4x4 matrix to `Mat4`
pub fn mat44_to_mat4(m: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from_cols_array_2d(m).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn translation_lands_in_last_column() {
        let m = [
            [1.0, 0.0, 0.0, 0.5],
            [0.0, 1.0, 0.0, 1.6],
            [0.0, 0.0, 1.0, -0.25],
        ];
        let mat = mat34_to_mat4(&m);
        assert_eq!(mat.w_axis, Vec4::new(0.5, 1.6, -0.25, 1.0));
        assert_eq!(mat.transform_point3(Vec3::ZERO), Vec3::new(0.5, 1.6, -0.25));
    }

    #[test]
    fn rotation_rows_become_columns() {
        // 90° about z: x -> y
        let m = [
            [0.0, -1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        let mat = mat34_to_mat4(&m);
        assert_eq!(mat.transform_vector3(Vec3::X), Vec3::Y);
        assert_eq!(mat.row(3), Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn mat44_keeps_rows() {
        let m = [
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
        ];
        let mat = mat44_to_mat4(&m);
        for (i, row) in m.iter().enumerate() {
            assert_eq!(mat.row(i), Vec4::from_array(*row));
        }
    }

    #[test]
    fn mat34_agrees_with_mat44() {
        let m34 = [
            [0.8, -0.6, 0.0, 0.1],
            [0.6, 0.8, 0.0, 0.2],
            [0.0, 0.0, 1.0, 0.3],
        ];
        let m44 = [m34[0], m34[1], m34[2], [0.0, 0.0, 0.0, 1.0]];
        assert_eq!(mat34_to_mat4(&m34), mat44_to_mat4(&m44));
    }
}
