use log::warn;
use nalgebra as na;
use na::{matrix, vector, Matrix4, Vector3};

/// Symmetric-frustum perspective projection.
///
/// `fov` is the vertical field of view in radians, `z_near` and `z_far` are positive distances to the
/// clipping planes along the viewing direction (camera looks down -z). The w-component of the result
/// carries -z for the perspective divide. After the divide z is +1.0 on the near plane and -1.0 on the
/// far plane, so greater means closer.
pub fn perspective(width: f32, height: f32, fov: f32, z_near: f32, z_far: f32) -> Matrix4<f32> {
    let aspect_ratio = width / height;
    let z_range = z_far - z_near;
    let tan_half_fov = (fov / 2.0).tan();
    return matrix![1.0 / (aspect_ratio * tan_half_fov), 0.0, 0.0, 0.0;
                   0.0, 1.0 / tan_half_fov, 0.0, 0.0;
                   0.0, 0.0, (z_far + z_near) / z_range, 2.0 * z_far * z_near / z_range;
                   0.0, 0.0, -1.0, 0.0];
}

/// Affine map from NDC [-1, 1]^3 to pixel coordinates [0, width - 1] x [0, height - 1] and depth [0, 1].
pub fn viewport(width: u32, height: u32) -> Matrix4<f32> {
    // Redef for convenience.
    let w = (width.max(1) - 1) as f32;
    let h = (height.max(1) - 1) as f32;
    return matrix![w / 2.0, 0.0,     0.0, w / 2.0;
                   0.0,     h / 2.0, 0.0, h / 2.0;
                   0.0,     0.0,     0.5, 0.5;
                   0.0,     0.0,     0.0, 1.0];
}

/// Transformation of a point through a homogeneous matrix, followed by the perspective divide.
/// When w ends up as 0.0 the result is non-finite, callers are expected to cull on that.
pub fn transform_point(matrix: &Matrix4<f32>, point: &Vector3<f32>) -> Vector3<f32> {
    let hom = matrix * vector![point.x, point.y, point.z, 1.0];
    return vector![hom.x / hom.w, hom.y / hom.w, hom.z / hom.w];
}

/// Transformation of a direction, no translation and no perspective divide.
/// Used for normals and tangents going through the inverse-transpose of the model matrix.
pub fn transform_vector(matrix: &Matrix4<f32>, vector: &Vector3<f32>) -> Vector3<f32> {
    return (matrix * vector.to_homogeneous()).xyz();
}

/// Inverse-transpose of the model matrix, identity if the model matrix is singular.
pub fn normal_matrix(model_matrix: &Matrix4<f32>) -> Matrix4<f32> {
    return inverse_or_identity(model_matrix, "model").transpose();
}

/// Inverse of a transform. A singular matrix would only happen with a broken setup (zero scale,
/// zero-sized viewport), in that case the frame renders wrong instead of aborting.
pub fn inverse_or_identity(matrix: &Matrix4<f32>, name: &str) -> Matrix4<f32> {
    match matrix.try_inverse() {
        Some(inverse) => return inverse,
        None => {
            warn!("{} matrix is not invertible, falling back to identity", name);
            return Matrix4::identity();
        }
    }
}
