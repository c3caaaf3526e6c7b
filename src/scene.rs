pub mod buffer;
pub mod camera;
pub mod color;
pub mod model;
pub mod raster;
pub mod shader;
pub mod transform;

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use nalgebra as na;
use na::{vector, Matrix4, Vector3};
use threadpool::ThreadPool;

use buffer::RenderTarget;
use camera::Camera;
use color::Color;
use model::Model;
use raster::{is_in_view, rasterize, VisibleFace};
use shader::{DepthShader, FlatShader, Lighting, PhongShader, Shader};
use transform::{perspective, transform_point, viewport};

/// What ends up on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingMode {
    Phong,     // Full pipeline, shadow pass followed by the lighting pass.
    Flat,      // Single intensity per face.
    Wireframe, // Triangle edges only.
    ShadowMap, // Depth buffer of the shadow pass in grey levels.
}

#[derive(Debug)]
pub struct UnknownShadingMode(String);

impl fmt::Display for UnknownShadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "unknown shading mode \"{}\", expected one of phong, flat, wireframe, shadow_map", self.0);
    }
}

impl Error for UnknownShadingMode {}

impl FromStr for ShadingMode {
    type Err = UnknownShadingMode;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "phong" => return Ok(ShadingMode::Phong),
            "flat" => return Ok(ShadingMode::Flat),
            "wireframe" => return Ok(ShadingMode::Wireframe),
            "shadow_map" => return Ok(ShadingMode::ShadowMap),
            _ => return Err(UnknownShadingMode(name.to_string())),
        }
    }
}

/// Frame constants of the renderer.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub fov: f32,       // Vertical, radians.
    pub z_near: f32,
    pub z_far: f32,
    pub light_fov: f32, // Of the shadow pass, radians.
    pub light_direction: Vector3<f32>, // Towards the light, also where the light camera is placed.
    pub background: Color,
    pub ambient: f32,
    pub shininess: f32,
    pub specular_scale: f32,
    pub shading: ShadingMode,
    pub threads: usize,
    pub bands_per_thread: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        return Self {
            width: 800,
            height: 800,
            fov: std::f32::consts::FRAC_PI_4,
            z_near: 0.1,
            z_far: 100.0,
            light_fov: std::f32::consts::FRAC_PI_2,
            light_direction: vector![1.0, 1.0, 1.0],
            background: Color::BLACK,
            ambient: 0.3,
            shininess: 16.0,
            specular_scale: 0.6,
            shading: ShadingMode::Phong,
            threads: std::thread::available_parallelism()
                .map(|threads| threads.get())
                .unwrap_or(4),
            bands_per_thread: 4,
        };
    }
}

impl RenderConfig {
    fn lighting(&self) -> Lighting {
        return Lighting {
            ambient: self.ambient,
            shininess: self.shininess,
            specular_scale: self.specular_scale,
        };
    }
}

/// Owns the frame and shadow buffers, the shaders and the worker pool, and draws a model with them.
///
/// Drawing a model in `Phong` mode takes two passes: the model is rendered from the light into the shadow
/// buffer with the depth shader, then the shadow buffer is snapshotted into the lighting shader and the
/// model is rendered from the camera into the frame buffer.
pub struct Renderer {
    config: RenderConfig,
    pool: ThreadPool,
    model: Arc<Model>,
    frame: RenderTarget,
    shadow: RenderTarget,
    viewport: Matrix4<f32>,
    projection: Matrix4<f32>,
    light_projection: Matrix4<f32>,
    depth_shader: Arc<DepthShader>,
    phong_shader: Arc<PhongShader>,
    flat_shader: Arc<FlatShader>,
}

impl Renderer {
    pub fn new(config: RenderConfig, model: Arc<Model>) -> Self {
        let threads = config.threads.max(1);
        let band_count = threads * config.bands_per_thread.max(1);
        let (width, height) = (config.width, config.height);
        let viewport = viewport(width, height);
        let projection = perspective(width as f32, height as f32, config.fov, config.z_near, config.z_far);
        let light_projection = perspective(width as f32, height as f32, config.light_fov, config.z_near, config.z_far);

        let mut renderer = Self {
            pool: ThreadPool::new(threads),
            frame: RenderTarget::new(width, height, band_count),
            shadow: RenderTarget::new(width, height, band_count),
            viewport,
            projection,
            light_projection,
            depth_shader: Arc::new(DepthShader::new(Arc::clone(&model), viewport)),
            phong_shader: Arc::new(PhongShader::new(Arc::clone(&model), viewport, config.light_direction, config.lighting())),
            flat_shader: Arc::new(FlatShader::new(Arc::clone(&model), viewport, config.light_direction)),
            model,
            config,
        };
        renderer.clear();
        return renderer;
    }

    pub fn config(&self) -> &RenderConfig {
        return &self.config;
    }

    pub fn frame(&self) -> &RenderTarget {
        return &self.frame;
    }

    /// Resets colors to the background and both depth buffers to the far sentinel.
    pub fn clear(&mut self) {
        self.frame.clear(self.config.background);
        self.shadow.clear(Color::BLACK);
    }

    /// Clears and draws the model, the whole frame in one call.
    pub fn render_frame(&mut self, camera: &Camera, model_matrix: &Matrix4<f32>) {
        self.clear();
        self.draw_model(camera, model_matrix);
    }

    /// Draws the model on top of whatever is in the buffers, according to the shading mode.
    pub fn draw_model(&mut self, camera: &Camera, model_matrix: &Matrix4<f32>) {
        let view = camera.view_matrix();
        let face_count = self.model.face_count();
        match self.config.shading {
            ShadingMode::Wireframe => {
                self.draw_wireframe(&view, model_matrix);
            }
            ShadingMode::Flat => {
                Arc::make_mut(&mut self.flat_shader).set_matrix(model_matrix, &self.projection, &view);
                let visible = run_pass(&self.pool, &mut self.flat_shader, face_count, &mut self.frame, self.config.background);
                debug!("flat pass: {} of {} faces visible", visible, face_count);
            }
            ShadingMode::Phong | ShadingMode::ShadowMap => {
                // Light looks from its direction at the origin, perspective, as wide as light_fov.
                let light_camera = Camera::new(self.config.light_direction, Vector3::zeros(), Vector3::y());
                let light_view = light_camera.view_matrix();
                Arc::make_mut(&mut self.depth_shader).set_matrix(model_matrix, &self.light_projection, &light_view);
                let visible = run_pass(&self.pool, &mut self.depth_shader, face_count, &mut self.shadow, Color::BLACK);
                debug!("shadow pass: {} of {} faces visible", visible, face_count);
                if self.config.shading == ShadingMode::ShadowMap {
                    return;
                }

                let light_transform = self.viewport * self.light_projection * light_view * model_matrix;
                let phong = Arc::make_mut(&mut self.phong_shader);
                phong.set_matrix(model_matrix, &self.projection, &view, &light_transform);
                phong.set_camera_position(camera.position());
                phong.update_shadow_map(&self.shadow);
                let visible = run_pass(&self.pool, &mut self.phong_shader, face_count, &mut self.frame, self.config.background);
                debug!("lighting pass: {} of {} faces visible", visible, face_count);
            }
        }
    }

    fn draw_wireframe(&mut self, view: &Matrix4<f32>, model_matrix: &Matrix4<f32>) {
        let transform = self.viewport * self.projection * view * model_matrix;
        for face in 0..self.model.face_count() {
            let screen = [0, 1, 2].map(|corner| transform_point(&transform, &self.model.vertex(face, corner)));
            if !is_in_view(&screen, self.frame.width(), self.frame.height()) {
                continue;
            }
            for i in 0..3 {
                let from = screen[i];
                let to = screen[(i + 1) % 3];
                self.frame.draw_line(
                    (from.x.round() as i32, from.y.round() as i32),
                    (to.x.round() as i32, to.y.round() as i32),
                    Color::WHITE,
                );
            }
        }
    }

    /// Image to show for the current shading mode as rgb8 data, top row first.
    pub fn to_rgb8(&self) -> Vec<u8> {
        match self.config.shading {
            ShadingMode::ShadowMap => return self.shadow.depth_to_rgb8(),
            _ => return self.frame.to_rgb8(),
        }
    }
}

/// Vertex stage over all faces on this thread, then the fragment stage of the faces, that are in view,
/// on the pool. Returns the number of rasterized faces.
fn run_pass<S: Shader + Clone + 'static>(
    pool: &ThreadPool,
    shader: &mut Arc<S>,
    face_count: usize,
    target: &mut RenderTarget,
    background: Color,
) -> usize {
    let stage = Arc::make_mut(shader);
    let mut faces = Vec::with_capacity(face_count);
    for face in 0..face_count {
        let screen = [stage.vertex(face, 0), stage.vertex(face, 1), stage.vertex(face, 2)];
        if !is_in_view(&screen, target.width(), target.height()) {
            continue;
        }
        stage.prepare_face(face);
        faces.push(VisibleFace { face, screen });
    }

    let visible = faces.len();
    rasterize(pool, shader, &Arc::new(faces), target, background);
    return visible;
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster::barycentric;

    const TRIANGLE_OBJ: &str = "\
v -0.5 -0.5 0.0
v 0.5 -0.5 0.0
v 0.0 0.5 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 0.5 1.0
vn 0.0 0.0 1.0
f 1/1/1 2/2/1 3/3/1
";

    // Large plane at z = 0 with a small triangle hovering above it.
    const SHADOW_OBJ: &str = "\
v -3.0 -3.0 0.0
v 3.0 -3.0 0.0
v 3.0 3.0 0.0
v -3.0 3.0 0.0
v -0.2 -0.2 1.5
v 0.2 -0.2 1.5
v 0.0 0.2 1.5
f 1 2 3 4
f 5 6 7
";

    fn config(shading: ShadingMode, threads: usize, bands_per_thread: usize) -> RenderConfig {
        return RenderConfig {
            width: 200,
            height: 200,
            light_direction: vector![0.0, 0.0, 1.0],
            shading,
            threads,
            bands_per_thread,
            ..Default::default()
        };
    }

    fn load(obj: &str) -> Arc<Model> {
        return Arc::new(Model::from_reader(obj.as_bytes()).unwrap());
    }

    fn front_camera(distance: f32) -> Camera {
        return Camera::new(vector![0.0, 0.0, distance], Vector3::zeros(), Vector3::y());
    }

    fn screen_position(renderer: &Renderer, camera: &Camera, point: Vector3<f32>) -> (i32, i32) {
        let transform = renderer.viewport * renderer.projection * camera.view_matrix();
        let screen = transform_point(&transform, &point);
        return (screen.x.round() as i32, screen.y.round() as i32);
    }

    /// Every pixel clearly inside the projected triangle is drawn with one color, every pixel clearly
    /// outside keeps the background.
    fn assert_single_triangle(renderer: &Renderer, camera: &Camera) -> Color {
        let transform = renderer.viewport * renderer.projection * camera.view_matrix();
        let corners = [0, 1, 2].map(|corner| transform_point(&transform, &renderer.model.vertex(0, corner)).xy());
        let mut fill = None;
        for y in 0..200 {
            for x in 0..200 {
                let color = renderer.frame().color_at(x, y).unwrap();
                let (u, v) = barycentric(corners[0], corners[1], corners[2], vector![x as f32, y as f32]).unwrap();
                let margin = 0.02;
                let inside = u > margin && v > margin && u + v < 1.0 - margin;
                let outside = u < -margin || v < -margin || u + v > 1.0 + margin;
                if inside {
                    assert_ne!(color, Color::BLACK, "pixel ({}, {})", x, y);
                    assert_eq!(*fill.get_or_insert(color), color, "pixel ({}, {})", x, y);
                } else if outside {
                    assert_eq!(color, Color::BLACK, "pixel ({}, {})", x, y);
                }
            }
        }
        return fill.unwrap();
    }

    #[test]
    fn shading_mode_names() {
        assert_eq!("phong".parse::<ShadingMode>().unwrap(), ShadingMode::Phong);
        assert_eq!("flat".parse::<ShadingMode>().unwrap(), ShadingMode::Flat);
        assert_eq!("wireframe".parse::<ShadingMode>().unwrap(), ShadingMode::Wireframe);
        assert_eq!("shadow_map".parse::<ShadingMode>().unwrap(), ShadingMode::ShadowMap);
        assert!("gouraud".parse::<ShadingMode>().is_err());
    }

    #[test]
    fn flat_triangle_end_to_end() {
        let mut renderer = Renderer::new(config(ShadingMode::Flat, 2, 4), load(TRIANGLE_OBJ));
        let camera = front_camera(3.0);
        renderer.render_frame(&camera, &Matrix4::identity());
        // Facing the light straight on.
        assert_eq!(assert_single_triangle(&renderer, &camera), Color::WHITE);
    }

    #[test]
    fn phong_triangle_end_to_end() {
        let mut renderer = Renderer::new(config(ShadingMode::Phong, 2, 4), load(TRIANGLE_OBJ));
        let camera = front_camera(3.0);
        renderer.render_frame(&camera, &Matrix4::identity());
        assert_eq!(assert_single_triangle(&renderer, &camera), Color::WHITE);
        // Triangle made it into the shadow buffer as well.
        let (x, y) = (99, 99);
        assert!(renderer.shadow.depth_at(x, y).unwrap() > 0.0);
    }

    #[test]
    fn render_frame_starts_from_clean_buffers() {
        let mut renderer = Renderer::new(config(ShadingMode::Flat, 1, 1), load(TRIANGLE_OBJ));
        renderer.render_frame(&front_camera(3.0), &Matrix4::identity());
        // Looking away, nothing should be left from the previous frame.
        let camera = Camera::new(vector![0.0, 0.0, 3.0], vector![0.0, 0.0, 6.0], Vector3::y());
        renderer.render_frame(&camera, &Matrix4::identity());
        assert!(renderer.frame().to_rgb8().iter().all(|value| *value == 0));
    }

    #[test]
    fn occluder_casts_shadow() {
        let mut config = config(ShadingMode::Phong, 2, 4);
        config.light_direction = vector![0.0, 0.0, 2.0];
        let mut renderer = Renderer::new(config, load(SHADOW_OBJ));
        let camera = front_camera(6.0);
        renderer.render_frame(&camera, &Matrix4::identity());

        // Below the hovering triangle from the camera, but inside its shadow on the plane.
        let (x, y) = screen_position(&renderer, &camera, vector![0.0, -0.55, 0.0]);
        assert_eq!(renderer.frame().color_at(x, y), Some(Color::WHITE * 0.3));
        let (x, y) = screen_position(&renderer, &camera, vector![1.5, 0.0, 0.0]);
        assert_eq!(renderer.frame().color_at(x, y), Some(Color::WHITE));
    }

    #[test]
    fn shadow_map_mode_presents_light_depth() {
        let mut renderer = Renderer::new(config(ShadingMode::ShadowMap, 1, 2), load(TRIANGLE_OBJ));
        renderer.render_frame(&front_camera(3.0), &Matrix4::identity());
        let image = renderer.to_rgb8();
        assert_eq!(image.len(), 3 * 200 * 200);
        assert!(image.iter().any(|value| *value > 0));
        // Frame buffer was left alone.
        assert!(renderer.frame().to_rgb8().iter().all(|value| *value == 0));
    }

    #[test]
    fn wireframe_draws_only_edges() {
        let mut renderer = Renderer::new(config(ShadingMode::Wireframe, 1, 1), load(TRIANGLE_OBJ));
        let camera = front_camera(3.0);
        renderer.render_frame(&camera, &Matrix4::identity());
        let corner = screen_position(&renderer, &camera, vector![-0.5, -0.5, 0.0]);
        assert_eq!(renderer.frame().color_at(corner.0, corner.1), Some(Color::WHITE));
        let center = screen_position(&renderer, &camera, vector![0.0, -0.1, 0.0]);
        assert_eq!(renderer.frame().color_at(center.0, center.1), Some(Color::BLACK));
    }

    #[test]
    fn bands_do_not_change_the_picture() {
        let camera = Camera::new(vector![1.0, 1.5, 6.0], Vector3::zeros(), Vector3::y());
        let mut config = config(ShadingMode::Phong, 1, 1);
        config.light_direction = vector![0.5, 0.5, 2.0];
        let mut single = Renderer::new(config.clone(), load(SHADOW_OBJ));
        config.threads = 4;
        config.bands_per_thread = 5;
        let mut banded = Renderer::new(config, load(SHADOW_OBJ));
        assert_eq!(single.frame().band_count(), 1);
        assert_eq!(banded.frame().band_count(), 20);

        single.render_frame(&camera, &Matrix4::identity());
        banded.render_frame(&camera, &Matrix4::identity());
        assert_eq!(single.to_rgb8(), banded.to_rgb8());

        let mut single_pixels = vec![0; 200 * 200];
        let mut banded_pixels = vec![0; 200 * 200];
        single.frame().copy_to(&mut single_pixels);
        banded.frame().copy_to(&mut banded_pixels);
        assert_eq!(single_pixels, banded_pixels);
    }
}
