use nalgebra as na;
use na::{matrix, Matrix4, Vector3};

/// Displacement of a single camera action, both for orbiting and zooming.
pub const MOVE_STEP: f32 = 0.1;

/// Discrete camera moves, delivered at most once per frame tick each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraAction {
    Up,
    Down,
    Left,
    Right,
    ZoomIn,
    ZoomOut,
}

/// Orbit camera around a fixed target.
///
/// `direction` points from the target to the camera (the camera looks down -direction), `right` and
/// `up` complete the orthonormal basis. Distance to the target is stored separately, so orbiting
/// reprojects onto the sphere of that radius and never drifts the zoom level.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vector3<f32>,
    target: Vector3<f32>,
    world_up: Vector3<f32>,
    direction: Vector3<f32>,
    right: Vector3<f32>,
    up: Vector3<f32>,
    distance: f32,
    view_matrix: Matrix4<f32>,
}

impl Camera {
    pub fn new(position: Vector3<f32>, target: Vector3<f32>, up: Vector3<f32>) -> Self {
        let mut camera = Self {
            position,
            target,
            world_up: up,
            direction: Vector3::z(),
            right: Vector3::x(),
            up: Vector3::y(),
            distance: 0.0,
            view_matrix: Matrix4::identity(),
        };
        camera.look_at(position, target);
        return camera;
    }

    pub fn position(&self) -> Vector3<f32> {
        return self.position;
    }

    pub fn target(&self) -> Vector3<f32> {
        return self.target;
    }

    pub fn distance(&self) -> f32 {
        return self.distance;
    }

    pub fn direction(&self) -> Vector3<f32> {
        return self.direction;
    }

    pub fn right(&self) -> Vector3<f32> {
        return self.right;
    }

    pub fn up(&self) -> Vector3<f32> {
        return self.up;
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        return self.view_matrix;
    }

    /// Places the camera and recomputes basis, view matrix and the orbit distance.
    pub fn look_at(&mut self, position: Vector3<f32>, target: Vector3<f32>) {
        self.position = position;
        self.target = target;
        self.distance = (position - target).norm();
        self.update_basis();
    }

    /// Applies one discrete move. Zooming in stops at a distance of `MOVE_STEP` from the target.
    pub fn step(&mut self, action: CameraAction) {
        match action {
            CameraAction::Up => self.orbit(self.up * MOVE_STEP),
            CameraAction::Down => self.orbit(-self.up * MOVE_STEP),
            CameraAction::Left => self.orbit(-self.right * MOVE_STEP),
            CameraAction::Right => self.orbit(self.right * MOVE_STEP),
            CameraAction::ZoomIn => self.zoom(-MOVE_STEP),
            CameraAction::ZoomOut => self.zoom(MOVE_STEP),
        }
        self.update_basis();
    }

    fn orbit(&mut self, offset: Vector3<f32>) {
        let moved = self.position + offset;
        // Reprojecting on the sphere around the target.
        let direction = (moved - self.target)
            .try_normalize(f32::EPSILON)
            .unwrap_or(self.direction);
        self.position = self.target + direction * self.distance;
    }

    fn zoom(&mut self, delta: f32) {
        // Not letting the camera pass through the target.
        self.distance = (self.distance + delta).max(MOVE_STEP);
        self.position = self.target + self.direction * self.distance;
    }

    fn update_basis(&mut self) {
        self.direction = (self.position - self.target)
            .try_normalize(f32::EPSILON)
            .unwrap_or(self.direction);
        // @CLEAN up parallel to the view direction has no defined right vector, borrowing the
        // world axis least aligned with the direction instead.
        self.right = match self.world_up.cross(&self.direction).try_normalize(1e-6) {
            Some(right) => right,
            None => least_aligned_axis(&self.direction)
                .cross(&self.direction)
                .normalize(),
        };
        self.up = self.direction.cross(&self.right).normalize();

        // Rows of the rotation are the basis vectors, so this is rotation^-1 * translation^-1.
        let (r, u, d, p) = (self.right, self.up, self.direction, self.position);
        self.view_matrix = matrix![r.x, r.y, r.z, -r.dot(&p);
                                   u.x, u.y, u.z, -u.dot(&p);
                                   d.x, d.y, d.z, -d.dot(&p);
                                   0.0, 0.0, 0.0, 1.0];
    }
}

fn least_aligned_axis(direction: &Vector3<f32>) -> Vector3<f32> {
    let abs = direction.abs();
    if abs.x <= abs.y && abs.x <= abs.z {
        return Vector3::x();
    } else if abs.y <= abs.z {
        return Vector3::y();
    } else {
        return Vector3::z();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::transform::transform_point;
    use na::vector;

    fn default_camera() -> Camera {
        return Camera::new(vector![0.0, 0.0, 3.0], Vector3::zeros(), Vector3::y());
    }

    fn assert_orthonormal(camera: &Camera) {
        let basis = [camera.right(), camera.up(), camera.direction()];
        for i in 0..3 {
            assert!((basis[i].norm() - 1.0).abs() < 1e-4);
            for j in (i + 1)..3 {
                assert!(basis[i].dot(&basis[j]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn view_matrix_moves_camera_to_origin() {
        let camera = default_camera();
        let view = camera.view_matrix();
        let eye = transform_point(&view, &camera.position());
        assert!(eye.norm() < 1e-5);
        // Target is straight ahead, down -z.
        let target = transform_point(&view, &camera.target());
        assert!((target - vector![0.0, 0.0, -3.0]).norm() < 1e-5);
        // World x stays screen right for a camera on +z.
        assert!((camera.right() - Vector3::x()).norm() < 1e-5);
    }

    #[test]
    fn orbiting_keeps_distance() {
        let mut camera = Camera::new(vector![1.0, 2.0, 3.0], vector![0.5, 0.0, -1.0], Vector3::y());
        let distance = camera.distance();
        let actions = [
            CameraAction::Up,
            CameraAction::Left,
            CameraAction::Left,
            CameraAction::Down,
            CameraAction::Right,
            CameraAction::Up,
            CameraAction::Up,
        ];
        for _ in 0..50 {
            for action in actions {
                camera.step(action);
                let current = (camera.position() - camera.target()).norm();
                assert!((current - distance).abs() < 1e-3);
                assert_orthonormal(&camera);
            }
        }
    }

    #[test]
    fn zoom_changes_distance_by_step() {
        let mut camera = default_camera();
        let mut previous = camera.distance();
        for _ in 0..5 {
            camera.step(CameraAction::ZoomIn);
            let current = (camera.position() - camera.target()).norm();
            assert!(current < previous);
            assert!((previous - current - MOVE_STEP).abs() < 1e-4);
            previous = current;
        }
        for _ in 0..5 {
            camera.step(CameraAction::ZoomOut);
            let current = (camera.position() - camera.target()).norm();
            assert!(current > previous);
            assert!((current - previous - MOVE_STEP).abs() < 1e-4);
            previous = current;
        }
    }

    #[test]
    fn zoom_in_stops_short_of_target() {
        let mut camera = default_camera();
        for _ in 0..100 {
            camera.step(CameraAction::ZoomIn);
        }
        assert!((camera.distance() - MOVE_STEP).abs() < 1e-5);
        assert!(((camera.position() - camera.target()).norm() - MOVE_STEP).abs() < 1e-5);
        assert_orthonormal(&camera);
    }

    #[test]
    fn look_at_resets_orbit_distance() {
        let mut camera = default_camera();
        camera.look_at(vector![0.0, 0.0, 7.0], vector![0.0, 0.0, 1.0]);
        assert!((camera.distance() - 6.0).abs() < 1e-5);
        camera.step(CameraAction::Up);
        let current = (camera.position() - camera.target()).norm();
        assert!((current - 6.0).abs() < 1e-4);
    }

    #[test]
    fn left_moves_camera_to_its_left() {
        let mut camera = default_camera();
        camera.step(CameraAction::Left);
        assert!(camera.position().x < 0.0);
        // Target stays in the middle of the view, geometry in front of it slides to the right.
        let view = camera.view_matrix();
        assert!(transform_point(&view, &camera.target()).x.abs() < 1e-5);
        assert!(transform_point(&view, &vector![0.0, 0.0, 1.0]).x > 0.0);

        let mut camera = default_camera();
        camera.step(CameraAction::Right);
        assert!(camera.position().x > 0.0);
        assert!(transform_point(&camera.view_matrix(), &vector![0.0, 0.0, 1.0]).x < 0.0);
    }

    #[test]
    fn up_parallel_to_direction_still_gives_basis() {
        let camera = Camera::new(vector![0.0, 5.0, 0.0], Vector3::zeros(), Vector3::y());
        assert_orthonormal(&camera);
        assert!(camera.view_matrix().iter().all(|value| value.is_finite()));
    }
}
