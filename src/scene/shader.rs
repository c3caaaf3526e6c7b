use std::sync::Arc;

use nalgebra as na;
use na::{Matrix2x3, Matrix3, Matrix4, Vector3};

use super::buffer::{DepthMap, RenderTarget};
use super::color::Color;
use super::model::Model;
use super::transform::{inverse_or_identity, normal_matrix, transform_point, transform_vector};

/// Programmable part of the pipeline.
///
/// `vertex` is called for the three corners of a face and returns their screen-space positions
/// (x, y in pixels, z as depth). Whatever the fragment stage needs is cached per face, indexed by the
/// face id, so faces can be processed in any order and rasterized concurrently. `prepare_face` runs once
/// all three corners of a visible face went through `vertex`. `fragment` gets the weights of the three
/// corners at a pixel and returns its color.
pub trait Shader: Send + Sync {
    fn vertex(&mut self, face: usize, corner: usize) -> Vector3<f32>;
    fn prepare_face(&mut self, _face: usize) {}
    fn fragment(&self, face: usize, weights: Vector3<f32>) -> Color;
}

/// Constants of the lighting model.
#[derive(Debug, Clone, Copy)]
pub struct Lighting {
    pub ambient: f32,
    pub shininess: f32,
    pub specular_scale: f32,
}

/// Only transforms vertices as seen from the light, color is irrelevant - the rasterizer records depth
/// into the shadow buffer as a side effect of the depth test.
#[derive(Clone)]
pub struct DepthShader {
    model: Arc<Model>,
    viewport: Matrix4<f32>,
    transform: Matrix4<f32>, // viewport * light projection * light view * model.
}

impl DepthShader {
    pub fn new(model: Arc<Model>, viewport: Matrix4<f32>) -> Self {
        return Self {
            model,
            viewport,
            transform: viewport,
        };
    }

    pub fn set_matrix(&mut self, model_matrix: &Matrix4<f32>, projection: &Matrix4<f32>, view: &Matrix4<f32>) {
        self.transform = self.viewport * projection * view * model_matrix;
    }
}

impl Shader for DepthShader {
    fn vertex(&mut self, face: usize, corner: usize) -> Vector3<f32> {
        return transform_point(&self.transform, &self.model.vertex(face, corner));
    }

    fn fragment(&self, _face: usize, _weights: Vector3<f32>) -> Color {
        return Color::BLACK;
    }
}

/// Values passed from the vertex stage to the fragment stage for one face, corners as columns.
#[derive(Debug, Clone, Default)]
struct PhongVaryings {
    positions: Matrix3<f32>, // Model space positions.
    uvs: Matrix2x3<f32>,
    normals: Matrix3<f32>, // Vertex normals already through the normal matrix.
    screen: Matrix3<f32>,
    tbn: Matrix3<f32>, // Tangent and bitangent as rows 0 and 1, row 2 is filled per fragment.
}

/// Phong lighting with diffuse, tangent space normal and specular maps, and shadows looked up in the
/// depth buffer of a previous pass rendered from the light.
#[derive(Clone)]
pub struct PhongShader {
    model: Arc<Model>,
    lighting: Lighting,
    viewport: Matrix4<f32>,
    transform: Matrix4<f32>,     // viewport * projection * view * model.
    model_matrix: Matrix4<f32>,  // Applied to interpolated positions for the view vector.
    normal_matrix: Matrix4<f32>, // Applied to normals, tangents and bitangents.
    shadow_matrix: Matrix4<f32>, // Transform from frame-buffer to shadow buffer coords.
    light_direction: Vector3<f32>, // Unit, pointing towards the light.
    camera_position: Vector3<f32>,
    shadow_map: DepthMap,
    faces: Vec<PhongVaryings>,
}

impl PhongShader {
    pub fn new(model: Arc<Model>, viewport: Matrix4<f32>, light_direction: Vector3<f32>, lighting: Lighting) -> Self {
        let faces = vec![PhongVaryings::default(); model.face_count()];
        return Self {
            model,
            lighting,
            viewport,
            transform: viewport,
            model_matrix: Matrix4::identity(),
            normal_matrix: Matrix4::identity(),
            shadow_matrix: Matrix4::identity(),
            light_direction: light_direction.try_normalize(f32::EPSILON).unwrap_or(Vector3::z()),
            camera_position: Vector3::zeros(),
            shadow_map: DepthMap::default(),
            faces,
        };
    }

    /// `light_transform` is the full transform used by the shadow pass, including its viewport.
    pub fn set_matrix(
        &mut self,
        model_matrix: &Matrix4<f32>,
        projection: &Matrix4<f32>,
        view: &Matrix4<f32>,
        light_transform: &Matrix4<f32>,
    ) {
        self.transform = self.viewport * projection * view * model_matrix;
        self.model_matrix = *model_matrix;
        self.normal_matrix = normal_matrix(model_matrix);
        // Undoing the camera transform back to model space, then going to the light screen.
        self.shadow_matrix = light_transform * inverse_or_identity(&self.transform, "camera");
    }

    pub fn set_camera_position(&mut self, camera_position: Vector3<f32>) {
        self.camera_position = camera_position;
    }

    /// Takes a snapshot of the shadow pass depth buffer.
    pub fn update_shadow_map(&mut self, shadow_buffer: &RenderTarget) {
        shadow_buffer.copy_depth_into(&mut self.shadow_map);
    }

    /// Tangent and bitangent of a face from its edges and their uv deltas, through the normal matrix.
    /// Faces without usable uvs get an arbitrary basis perpendicular to the face.
    fn compute_tbn(&mut self, face: usize) {
        let varyings = &mut self.faces[face];
        let edge_1: Vector3<f32> = varyings.positions.column(1) - varyings.positions.column(0);
        let edge_2: Vector3<f32> = varyings.positions.column(2) - varyings.positions.column(0);
        let delta_uv_1 = varyings.uvs.column(1) - varyings.uvs.column(0);
        let delta_uv_2 = varyings.uvs.column(2) - varyings.uvs.column(0);

        let determinant = delta_uv_1.x * delta_uv_2.y - delta_uv_2.x * delta_uv_1.y;
        let (tangent, bitangent) = if determinant.abs() > 1e-12 {
            let f = 1.0 / determinant;
            (
                f * (delta_uv_2.y * edge_1 - delta_uv_1.y * edge_2),
                f * (delta_uv_1.x * edge_2 - delta_uv_2.x * edge_1),
            )
        } else {
            let normal = edge_1.cross(&edge_2).try_normalize(f32::EPSILON).unwrap_or(Vector3::z());
            let tangent = normal
                .cross(&Vector3::y())
                .try_normalize(1e-6)
                .unwrap_or_else(|| normal.cross(&Vector3::x()).normalize());
            (tangent, normal.cross(&tangent))
        };

        let t_tangent = transform_vector(&self.normal_matrix, &tangent)
            .try_normalize(f32::EPSILON)
            .unwrap_or(Vector3::x());
        let t_bitangent = transform_vector(&self.normal_matrix, &bitangent)
            .try_normalize(f32::EPSILON)
            .unwrap_or(Vector3::y());
        varyings.tbn.set_row(0, &t_tangent.transpose());
        varyings.tbn.set_row(1, &t_bitangent.transpose());
    }

    /// 1.0 if the fragment at screen position is occluded from the light, 0.0 otherwise.
    /// The slope-scaled bias fights shadow acne on surfaces at grazing angles to the light.
    fn shadow_factor(&self, screen: &Vector3<f32>, n_dot_l: f32) -> f32 {
        let shadow_coord = transform_point(&self.shadow_matrix, screen);
        let bias = (0.02 * (1.0 - n_dot_l)).max(0.001);
        match self
            .shadow_map
            .depth_at(shadow_coord.x.round() as i32, shadow_coord.y.round() as i32)
        {
            Some(stored) if stored > shadow_coord.z + bias => return 1.0,
            _ => return 0.0,
        }
    }
}

impl Shader for PhongShader {
    fn vertex(&mut self, face: usize, corner: usize) -> Vector3<f32> {
        let position = self.model.vertex(face, corner);
        let normal = transform_vector(&self.normal_matrix, &self.model.normal(face, corner));
        let screen = transform_point(&self.transform, &position);

        let varyings = &mut self.faces[face];
        varyings.positions.set_column(corner, &position);
        varyings.uvs.set_column(corner, &self.model.uv(face, corner));
        varyings.normals.set_column(corner, &normal);
        varyings.screen.set_column(corner, &screen);
        return screen;
    }

    fn prepare_face(&mut self, face: usize) {
        self.compute_tbn(face);
    }

    fn fragment(&self, face: usize, weights: Vector3<f32>) -> Color {
        let varyings = &self.faces[face];
        let uv = varyings.uvs * weights;
        let world_position = transform_point(&self.model_matrix, &(varyings.positions * weights));
        let screen = varyings.screen * weights;

        let normal = (varyings.normals * weights)
            .try_normalize(f32::EPSILON)
            .unwrap_or(Vector3::z());
        let mut tbn = varyings.tbn;
        tbn.set_row(2, &normal.transpose());

        // Everything below is in tangent space.
        let n = self.model.normal_tangent(uv);
        let light = (tbn * self.light_direction)
            .try_normalize(f32::EPSILON)
            .unwrap_or(Vector3::z());
        let to_camera = (tbn * (self.camera_position - world_position))
            .try_normalize(f32::EPSILON)
            .unwrap_or(Vector3::z());
        let n_dot_l = n.dot(&light);
        // Reflection of -light about n.
        let reflected = 2.0 * n_dot_l * n - light;

        let diffuse = n_dot_l.max(0.0);
        let specular = to_camera.dot(&reflected).max(0.0).powf(self.lighting.shininess)
            * self.model.specular(uv)
            * self.lighting.specular_scale;
        let shadow = self.shadow_factor(&screen, n_dot_l);

        return self.model.diffuse(uv) * (self.lighting.ambient + (1.0 - shadow) * (diffuse + specular));
    }
}

/// Per-face values of the flat shader, corners as columns.
#[derive(Debug, Clone, Default)]
struct FlatVaryings {
    positions: Matrix3<f32>,
    uvs: Matrix2x3<f32>,
    intensity: f32, // Diffuse coefficient of the whole face.
}

/// Diffuse texture scaled by a single intensity per face, computed from the face normal.
#[derive(Clone)]
pub struct FlatShader {
    model: Arc<Model>,
    viewport: Matrix4<f32>,
    transform: Matrix4<f32>,
    normal_matrix: Matrix4<f32>,
    light_direction: Vector3<f32>,
    faces: Vec<FlatVaryings>,
}

impl FlatShader {
    pub fn new(model: Arc<Model>, viewport: Matrix4<f32>, light_direction: Vector3<f32>) -> Self {
        let faces = vec![FlatVaryings::default(); model.face_count()];
        return Self {
            model,
            viewport,
            transform: viewport,
            normal_matrix: Matrix4::identity(),
            light_direction: light_direction.try_normalize(f32::EPSILON).unwrap_or(Vector3::z()),
            faces,
        };
    }

    pub fn set_matrix(&mut self, model_matrix: &Matrix4<f32>, projection: &Matrix4<f32>, view: &Matrix4<f32>) {
        self.transform = self.viewport * projection * view * model_matrix;
        self.normal_matrix = normal_matrix(model_matrix);
    }
}

impl Shader for FlatShader {
    fn vertex(&mut self, face: usize, corner: usize) -> Vector3<f32> {
        let position = self.model.vertex(face, corner);
        let varyings = &mut self.faces[face];
        varyings.positions.set_column(corner, &position);
        varyings.uvs.set_column(corner, &self.model.uv(face, corner));
        return transform_point(&self.transform, &position);
    }

    fn prepare_face(&mut self, face: usize) {
        let varyings = &mut self.faces[face];
        let edge_1: Vector3<f32> = varyings.positions.column(1) - varyings.positions.column(0);
        let edge_2: Vector3<f32> = varyings.positions.column(2) - varyings.positions.column(0);
        let face_normal = transform_vector(&self.normal_matrix, &edge_1.cross(&edge_2));
        varyings.intensity = match face_normal.try_normalize(f32::EPSILON) {
            Some(normal) => normal.dot(&self.light_direction).max(0.0),
            None => 0.0,
        };
    }

    fn fragment(&self, face: usize, weights: Vector3<f32>) -> Color {
        let varyings = &self.faces[face];
        let color = self.model.diffuse(varyings.uvs * weights);
        return Color::blend(color, Color::BLACK, varyings.intensity);
    }
}
