use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time;

use image::RgbImage;
use log::{debug, info};
use nalgebra as na;
use na::{vector, Matrix4, Vector3};
use show_image::event::{ElementState, VirtualKeyCode, WindowEvent};
use show_image::{create_window, ImageInfo, ImageView, WindowOptions};

use crate::scene::camera::{Camera, CameraAction};
use crate::scene::model::Model;
use crate::scene::{RenderConfig, Renderer};

/// Execution context, built from the command line.
pub struct Params {
    pub config: RenderConfig,
    pub print_fps: bool,
    pub asset_path: PathBuf,
    pub output_path: Option<PathBuf>, // Render a single frame into this file instead of opening a window.
}

/// Camera actions of the keys currently held down, fed from window keyboard events.
#[derive(Debug, Default)]
pub struct InputState {
    held: Vec<CameraAction>,
    exit: bool,
}

impl InputState {
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn handle_event(&mut self, window_event: &WindowEvent) {
        if let WindowEvent::KeyboardInput(event) = window_event {
            if let Some(key_code) = event.input.key_code {
                match event.input.state {
                    ElementState::Pressed => self.press(key_code),
                    ElementState::Released => self.release(key_code),
                }
            }
        }
    }

    pub fn press(&mut self, key_code: VirtualKeyCode) {
        if key_code == VirtualKeyCode::Escape {
            self.exit = true;
        }
        if let Some(action) = action_of(key_code) {
            if !self.held.contains(&action) {
                self.held.push(action);
            }
        }
    }

    pub fn release(&mut self, key_code: VirtualKeyCode) {
        if let Some(action) = action_of(key_code) {
            self.held.retain(|held| *held != action);
        }
    }

    pub fn should_exit(&self) -> bool {
        return self.exit;
    }

    /// Every held action once, in the order the keys went down.
    pub fn actions(&self) -> &[CameraAction] {
        return &self.held;
    }
}

/// Arrows and WASD orbit, Q and E zoom.
fn action_of(key_code: VirtualKeyCode) -> Option<CameraAction> {
    match key_code {
        VirtualKeyCode::Up | VirtualKeyCode::W => return Some(CameraAction::Up),
        VirtualKeyCode::Down | VirtualKeyCode::S => return Some(CameraAction::Down),
        VirtualKeyCode::Left | VirtualKeyCode::A => return Some(CameraAction::Left),
        VirtualKeyCode::Right | VirtualKeyCode::D => return Some(CameraAction::Right),
        VirtualKeyCode::Q => return Some(CameraAction::ZoomIn),
        VirtualKeyCode::E => return Some(CameraAction::ZoomOut),
        _ => return None,
    }
}

fn initial_camera() -> Camera {
    return Camera::new(vector![0.0, 0.0, 3.0], Vector3::zeros(), Vector3::y());
}

/// Renders one frame and writes it to `output_path`, format is picked by the extension.
pub fn render_to_file(renderer: &mut Renderer, camera: &Camera, output_path: &Path) -> Result<(), Box<dyn Error>> {
    renderer.render_frame(camera, &Matrix4::identity());
    let config = renderer.config();
    let image = RgbImage::from_raw(config.width, config.height, renderer.to_rgb8())
        .ok_or("rendered frame doesn't match its dimensions")?;
    image.save(output_path)?;
    info!("frame saved to {}", output_path.display());
    return Ok(());
}

/// Actually launches the window, showing rendered frames, or renders a single frame into a file.
pub fn run(params: Params) -> Result<(), Box<dyn Error>> {
    let model = Arc::new(Model::load(&params.asset_path)?);
    let (width, height) = (params.config.width, params.config.height);
    let mut renderer = Renderer::new(params.config, model);
    let mut camera = initial_camera();

    if let Some(output_path) = params.output_path {
        return render_to_file(&mut renderer, &camera, &output_path);
    }

    let window_options = WindowOptions {
        size: Some([width, height]),
        ..Default::default()
    };
    let window = create_window("output", window_options)?;
    let event_channel = window.event_channel()?;

    let mut input = InputState::new();
    let mut frame_counter_time_begin = time::Instant::now();
    let mut frame_counter: u32 = 0;
    while !input.should_exit() {
        // Unloading all the events, that have piled up since the last frame.
        for window_event in event_channel.try_iter() {
            input.handle_event(&window_event);
        }
        for action in input.actions() {
            camera.step(*action);
        }

        renderer.render_frame(&camera, &Matrix4::identity());
        let image_data = renderer.to_rgb8();
        let image_view = ImageView::new(ImageInfo::rgb8(width, height), &image_data);
        window.set_image("image", image_view)?;

        if params.print_fps {
            // Counting frames to printout stats every second.
            frame_counter += 1;
            if frame_counter_time_begin.elapsed().as_secs_f32() > 1.0 {
                debug!("FPS --- {}", frame_counter);
                frame_counter_time_begin = time::Instant::now();
                frame_counter = 0;
            }
        }
    }

    return Ok(());
}
