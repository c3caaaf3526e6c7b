use std::sync::{mpsc, Arc};

use nalgebra as na;
use na::{vector, Vector2, Vector3};
use threadpool::ThreadPool;

use super::buffer::{FrameBuffer, RenderTarget};
use super::color::Color;
use super::shader::Shader;

/// Screen-space corners of a face: x, y in pixels and z as viewport depth.
pub type ScreenTriangle = [Vector3<f32>; 3];

/// Face, that survived culling, ready to be scan converted.
#[derive(Debug, Clone, Copy)]
pub struct VisibleFace {
    pub face: usize,
    pub screen: ScreenTriangle,
}

/// Barycentric coordinates (u, v) of point p in triangle abc, such that p = a + v * (b - a) + u * (c - a).
/// Solved from the 2x2 system of dot products. None for a degenerate (zero-area) triangle.
pub fn barycentric(a: Vector2<f32>, b: Vector2<f32>, c: Vector2<f32>, p: Vector2<f32>) -> Option<(f32, f32)> {
    // Doubles, since the products of pixel coordinates get large.
    let ab = (b - a).cast::<f64>();
    let ac = (c - a).cast::<f64>();
    let ap = (p - a).cast::<f64>();
    let abab = ab.dot(&ab);
    let abac = ab.dot(&ac);
    let acac = ac.dot(&ac);
    let apab = ap.dot(&ab);
    let apac = ap.dot(&ac);

    let denominator = acac * abab - abac * abac;
    if denominator.abs() <= f64::EPSILON * abab * acac {
        return None;
    }
    let u = (abab * apac - abac * apab) / denominator;
    let v = (acac * apab - abac * apac) / denominator;
    return Some((u as f32, v as f32));
}

/// Weights of corners 0, 1 and 2 for barycentric (u, v), used to interpolate per-corner attributes.
pub fn corner_weights(u: f32, v: f32) -> Vector3<f32> {
    return vector![1.0 - u - v, v, u];
}

/// Checks that a face is worth rasterizing at all: every corner has finite coordinates and depth in
/// [0, 1] (between the near and far planes), and its bounding box touches the window.
pub fn is_in_view(screen: &ScreenTriangle, width: u32, height: u32) -> bool {
    if screen.iter().any(|corner| !corner.iter().all(|value| value.is_finite())) {
        return false;
    }
    if screen.iter().any(|corner| corner.z < 0.0 || corner.z > 1.0) {
        return false;
    }
    let min_x = screen.iter().map(|corner| corner.x).fold(f32::MAX, f32::min);
    let max_x = screen.iter().map(|corner| corner.x).fold(f32::MIN, f32::max);
    let min_y = screen.iter().map(|corner| corner.y).fold(f32::MAX, f32::min);
    let max_y = screen.iter().map(|corner| corner.y).fold(f32::MIN, f32::max);
    return max_x >= 0.0
        && min_x <= width.saturating_sub(1) as f32
        && max_y >= 0.0
        && min_y <= height.saturating_sub(1) as f32;
}

/// Scan converts one triangle into a band.
///
/// Every pixel of the bounding box (clamped to the band) gets barycentric coordinates; pixels inside the
/// triangle are depth tested against the band and, on success, shaded and written together with their
/// depth. Depth is interpolated linearly in screen space, greater is closer.
pub fn draw_triangle<F>(band: &mut FrameBuffer, screen: &ScreenTriangle, mut fragment: F)
where
    F: FnMut(Vector3<f32>) -> Color,
{
    let Some((band_min_y, band_max_y)) = band.y_range() else {
        return;
    };
    let max_x = (band.width() - 1) as f32;
    let min_x = screen.iter().map(|corner| corner.x).fold(f32::MAX, f32::min).max(0.0);
    let max_x = screen.iter().map(|corner| corner.x).fold(f32::MIN, f32::max).min(max_x);
    let min_y = screen
        .iter()
        .map(|corner| corner.y)
        .fold(f32::MAX, f32::min)
        .max(band_min_y as f32);
    let max_y = screen
        .iter()
        .map(|corner| corner.y)
        .fold(f32::MIN, f32::max)
        .min(band_max_y as f32);
    if min_x > max_x || min_y > max_y {
        return;
    }

    let a = screen[0].xy();
    let b = screen[1].xy();
    let c = screen[2].xy();
    let depths = vector![screen[0].z, screen[1].z, screen[2].z];
    for y in (min_y.ceil() as i32)..=(max_y.floor() as i32) {
        for x in (min_x.ceil() as i32)..=(max_x.floor() as i32) {
            let Some((u, v)) = barycentric(a, b, c, vector![x as f32, y as f32]) else {
                // Degenerate triangle, none of its pixels are inside.
                return;
            };
            if u < 0.0 || v < 0.0 || u + v > 1.0 {
                continue;
            }
            let weights = corner_weights(u, v);
            let depth = weights.dot(&depths);
            band.test_and_set(x, y, depth, || fragment(weights));
        }
    }
}

/// Rasterizes faces with the fragment stage of `shader` into every band of the target in parallel.
///
/// Each band is moved into its own job and sent back through a channel once all faces are drawn into
/// it. Bands don't share pixels, so depth test and write need no locking.
pub fn rasterize<S: Shader + 'static>(
    pool: &ThreadPool,
    shader: &Arc<S>,
    faces: &Arc<Vec<VisibleFace>>,
    target: &mut RenderTarget,
    background: Color,
) {
    let bands = target.take_bands();
    let band_count = bands.len();
    let (sender, receiver) = mpsc::channel::<FrameBuffer>();
    for mut band in bands {
        let shader = Arc::clone(shader);
        let faces = Arc::clone(faces);
        let sender = sender.clone();
        pool.execute(move || {
            for visible in faces.iter() {
                draw_triangle(&mut band, &visible.screen, |weights| {
                    shader.fragment(visible.face, weights)
                });
            }
            // Receiver outlives all jobs, nothing to do if it doesn't.
            let _ = sender.send(band);
        });
    }
    drop(sender);

    let bands: Vec<FrameBuffer> = receiver.iter().take(band_count).collect();
    // Jobs may still hold their shader clones right after sending.
    pool.join();
    target.restore_bands(bands, band_count, background);
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::new(255, 0, 0);
    const BLUE: Color = Color::new(0, 0, 255);

    #[test]
    fn barycentric_reconstructs_inner_points() {
        let a = vector![2.0, 3.0];
        let b = vector![40.0, 7.0];
        let c = vector![15.0, 33.0];
        for y in 0..40 {
            for x in 0..45 {
                let p = vector![x as f32, y as f32];
                let (u, v) = barycentric(a, b, c, p).unwrap();
                let inside = u >= 0.0 && v >= 0.0 && u + v <= 1.0;
                if !inside {
                    continue;
                }
                let reconstructed = a + v * (b - a) + u * (c - a);
                assert!((reconstructed - p).norm() < 1e-3);
            }
        }
        // Corners themselves.
        assert_eq!(barycentric(a, b, c, a), Some((0.0, 0.0)));
        let (u, v) = barycentric(a, b, c, b).unwrap();
        assert!((u - 0.0).abs() < 1e-6 && (v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_triangles_are_rejected() {
        let p = vector![1.0, 1.0];
        assert_eq!(barycentric(vector![0.0, 0.0], vector![5.0, 5.0], vector![10.0, 10.0], p), None);
        assert_eq!(barycentric(vector![3.0, 3.0], vector![3.0, 3.0], vector![3.0, 3.0], p), None);

        let mut target = RenderTarget::new(16, 16, 1);
        let band = target.as_single_band().unwrap();
        let line = [vector![0.0, 0.0, 0.5], vector![8.0, 8.0, 0.5], vector![15.0, 15.0, 0.5]];
        draw_triangle(band, &line, |_| RED);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(target.color_at(x, y), Some(Color::BLACK));
            }
        }
    }

    #[test]
    fn triangle_fills_only_inside() {
        let mut target = RenderTarget::new(20, 20, 1);
        let screen = [vector![2.0, 2.0, 0.5], vector![17.0, 2.0, 0.5], vector![2.0, 17.0, 0.5]];
        draw_triangle(target.as_single_band().unwrap(), &screen, |_| RED);
        assert_eq!(target.color_at(5, 5), Some(RED));
        assert_eq!(target.color_at(2, 2), Some(RED));
        assert_eq!(target.color_at(15, 15), Some(Color::BLACK));
        assert_eq!(target.color_at(1, 5), Some(Color::BLACK));
        let depth = target.depth_at(5, 5).unwrap();
        assert!((depth - 0.5).abs() < 1e-6);
    }

    #[test]
    fn triangle_partially_outside_is_clamped() {
        let mut target = RenderTarget::new(10, 10, 1);
        let screen = [vector![-20.0, -20.0, 0.5], vector![40.0, -20.0, 0.5], vector![5.0, 40.0, 0.5]];
        draw_triangle(target.as_single_band().unwrap(), &screen, |_| RED);
        assert_eq!(target.color_at(5, 5), Some(RED));
        assert_eq!(target.color_at(0, 0), Some(RED));
    }

    #[test]
    fn closer_triangle_wins_regardless_of_order() {
        let near = [vector![0.0, 0.0, 0.8], vector![15.0, 0.0, 0.8], vector![0.0, 15.0, 0.8]];
        let far = [vector![0.0, 0.0, 0.3], vector![15.0, 0.0, 0.3], vector![0.0, 15.0, 0.3]];

        let mut near_first = RenderTarget::new(16, 16, 1);
        draw_triangle(near_first.as_single_band().unwrap(), &near, |_| RED);
        draw_triangle(near_first.as_single_band().unwrap(), &far, |_| BLUE);

        let mut far_first = RenderTarget::new(16, 16, 1);
        draw_triangle(far_first.as_single_band().unwrap(), &far, |_| BLUE);
        draw_triangle(far_first.as_single_band().unwrap(), &near, |_| RED);

        assert_eq!(near_first.color_at(3, 3), Some(RED));
        assert_eq!(far_first.color_at(3, 3), Some(RED));
        assert_eq!(near_first.to_rgb8(), far_first.to_rgb8());
    }

    #[test]
    fn interpolated_depth_decides_per_pixel() {
        // Two triangles crossing each other: the sloped one is in front on the left half only.
        let flat = [vector![0.0, 0.0, 0.5], vector![19.0, 0.0, 0.5], vector![0.0, 19.0, 0.5]];
        let sloped = [vector![0.0, 0.0, 0.9], vector![19.0, 0.0, 0.1], vector![0.0, 19.0, 0.9]];
        let mut target = RenderTarget::new(20, 20, 1);
        draw_triangle(target.as_single_band().unwrap(), &flat, |_| BLUE);
        draw_triangle(target.as_single_band().unwrap(), &sloped, |_| RED);
        assert_eq!(target.color_at(2, 2), Some(RED));
        assert_eq!(target.color_at(15, 2), Some(BLUE));
    }

    #[test]
    fn view_check_culls_off_screen_and_clipped_faces() {
        let inside = [vector![1.0, 1.0, 0.5], vector![5.0, 1.0, 0.5], vector![1.0, 5.0, 0.5]];
        assert!(is_in_view(&inside, 10, 10));
        // Corners all outside, but the face spans the window.
        let covering = [vector![-50.0, -50.0, 0.5], vector![60.0, -50.0, 0.5], vector![5.0, 60.0, 0.5]];
        assert!(is_in_view(&covering, 10, 10));
        let off_screen = [vector![20.0, 1.0, 0.5], vector![25.0, 1.0, 0.5], vector![20.0, 5.0, 0.5]];
        assert!(!is_in_view(&off_screen, 10, 10));
        let behind = [vector![1.0, 1.0, -0.5], vector![5.0, 1.0, 0.5], vector![1.0, 5.0, 0.5]];
        assert!(!is_in_view(&behind, 10, 10));
        let broken = [vector![f32::NAN, 1.0, 0.5], vector![5.0, 1.0, 0.5], vector![1.0, 5.0, 0.5]];
        assert!(!is_in_view(&broken, 10, 10));
    }
}
