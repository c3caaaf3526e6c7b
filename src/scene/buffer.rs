use log::error;

use super::color::Color;

/// Value the depth buffers are cleared with. Depth grows towards the camera, so anything drawn wins
/// over it.
pub const DEPTH_CLEAR: f32 = f32::MIN;

/// Row in a frame of `height` rows for screen coordinate y. Screen y goes up, rows go down, so
/// (0, 0) is the bottom left pixel on screen.
fn row_of(height: u32, y: i32) -> i32 {
    return height as i32 - 1 - y;
}

/// Horizontal band of a frame, holding packed colors and depth values in flat row-major arrays.
/// A band covering all rows is just a regular frame buffer.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    width: u32,       // Width of the frame.
    height: u32,      // Height of the whole frame, not of this band.
    row_start: usize, // First frame row stored in the band.
    rows: usize,      // Number of rows stored in the band.
    color: Vec<u32>,
    depth: Vec<f32>,
}

impl FrameBuffer {
    fn new(width: u32, height: u32, row_start: usize, rows: usize) -> Self {
        let n_pixels = width as usize * rows;
        return Self {
            width,
            height,
            row_start,
            rows,
            color: vec![0; n_pixels],
            depth: vec![DEPTH_CLEAR; n_pixels],
        };
    }

    /// Inclusive range of screen y coordinates stored in this band, None for an empty band.
    pub fn y_range(&self) -> Option<(i32, i32)> {
        if self.rows == 0 || self.width == 0 {
            return None;
        }
        let top_row = self.row_start as i32;
        let bottom_row = (self.row_start + self.rows) as i32 - 1;
        return Some((row_of(self.height, bottom_row), row_of(self.height, top_row)));
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    /// Index into the flat arrays, None if the pixel is outside of the band.
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let row = row_of(self.height, y) - self.row_start as i32;
        if x < 0 || x >= self.width as i32 || row < 0 || row >= self.rows as i32 {
            return None;
        }
        return Some(row as usize * self.width as usize + x as usize);
    }

    pub fn clear(&mut self, background: Color) {
        self.color.fill(background.hex());
        self.depth.fill(DEPTH_CLEAR);
    }

    /// Writes color without touching depth. Illegal coordinates are skipped.
    pub fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if let Some(index) = self.index(x, y) {
            self.color[index] = color.hex();
        }
    }

    /// Depth test and write as a single step: shades and writes both color and depth only if `depth` is
    /// strictly greater than the stored value. Returns whether the pixel was written.
    pub fn test_and_set<F: FnOnce() -> Color>(&mut self, x: i32, y: i32, depth: f32, shade: F) -> bool {
        let Some(index) = self.index(x, y) else {
            return false;
        };
        if !(depth > self.depth[index]) {
            return false;
        }
        self.depth[index] = depth;
        self.color[index] = shade().hex();
        return true;
    }

    pub fn color_at(&self, x: i32, y: i32) -> Option<Color> {
        return self.index(x, y).map(|index| Color::from_hex(self.color[index]));
    }

    pub fn depth_at(&self, x: i32, y: i32) -> Option<f32> {
        return self.index(x, y).map(|index| self.depth[index]);
    }
}

/// Depth values of a whole frame, detached from the frame itself. Used for shadow lookups.
#[derive(Clone, Debug, Default)]
pub struct DepthMap {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

impl DepthMap {
    pub fn depth_at(&self, x: i32, y: i32) -> Option<f32> {
        let row = row_of(self.height, y);
        if x < 0 || x >= self.width as i32 || row < 0 || row >= self.height as i32 {
            return None;
        }
        return Some(self.depth[row as usize * self.width as usize + x as usize]);
    }
}

/// Whole frame split into bands, ordered from the top row down.
/// Bands never overlap, so each of them can be rasterized into independently.
#[derive(Clone, Debug)]
pub struct RenderTarget {
    width: u32,
    height: u32,
    bands: Vec<FrameBuffer>,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32, band_count: usize) -> Self {
        let band_count = band_count.clamp(1, height.max(1) as usize);
        let rows_per_band = (height as usize + band_count - 1) / band_count;
        let mut bands = Vec::with_capacity(band_count);
        let mut row_start = 0;
        while row_start < height as usize {
            let rows = rows_per_band.min(height as usize - row_start);
            bands.push(FrameBuffer::new(width, height, row_start, rows));
            row_start += rows;
        }
        return Self { width, height, bands };
    }

    pub fn width(&self) -> u32 {
        return self.width;
    }

    pub fn height(&self) -> u32 {
        return self.height;
    }

    pub fn band_count(&self) -> usize {
        return self.bands.len();
    }

    /// Hands all bands out, leaving the target empty until `restore_bands` is called.
    pub fn take_bands(&mut self) -> Vec<FrameBuffer> {
        return std::mem::take(&mut self.bands);
    }

    /// Puts bands back in row order. Bands lost on the way are recreated cleared.
    pub fn restore_bands(&mut self, mut bands: Vec<FrameBuffer>, expected: usize, background: Color) {
        if bands.len() != expected {
            error!("{} of {} frame bands were lost, recreating them", expected - bands.len().min(expected), expected);
            let template = RenderTarget::new(self.width, self.height, expected);
            for mut band in template.bands {
                if bands.iter().all(|kept| kept.row_start != band.row_start) {
                    band.clear(background);
                    bands.push(band);
                }
            }
        }
        bands.sort_by_key(|band| band.row_start);
        self.bands = bands;
    }

    fn band_of(&self, y: i32) -> Option<usize> {
        let row = row_of(self.height, y);
        if row < 0 {
            return None;
        }
        return self
            .bands
            .iter()
            .position(|band| (row as usize) >= band.row_start && (row as usize) < band.row_start + band.rows);
    }

    /// Sets all colors to background and depth values to the far sentinel.
    pub fn clear(&mut self, background: Color) {
        for band in self.bands.iter_mut() {
            band.clear(background);
        }
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if let Some(band) = self.band_of(y) {
            self.bands[band].set_pixel(x, y, color);
        }
    }

    pub fn color_at(&self, x: i32, y: i32) -> Option<Color> {
        return self.band_of(y).and_then(|band| self.bands[band].color_at(x, y));
    }

    pub fn depth_at(&self, x: i32, y: i32) -> Option<f32> {
        return self.band_of(y).and_then(|band| self.bands[band].depth_at(x, y));
    }

    /// Single-band view of the whole frame, only valid when the target has exactly one band.
    pub fn as_single_band(&mut self) -> Option<&mut FrameBuffer> {
        if self.bands.len() != 1 {
            return None;
        }
        return self.bands.first_mut();
    }

    /// Draws a line between coordinates with specified color via Bresenham's algorithm.
    /// Axes are transposed for steep lines, so there is a pixel for every step along the major axis.
    /// Ignores the depth buffer.
    pub fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color) {
        let (mut x_0, mut y_0) = from;
        let (mut x_1, mut y_1) = to;
        let steep = (x_0 - x_1).abs() < (y_0 - y_1).abs();
        if steep {
            std::mem::swap(&mut x_0, &mut y_0);
            std::mem::swap(&mut x_1, &mut y_1);
        }
        // Making it left to right.
        if x_0 > x_1 {
            std::mem::swap(&mut x_0, &mut x_1);
            std::mem::swap(&mut y_0, &mut y_1);
        }

        let dx = x_1 - x_0;
        let derror = 2 * (y_1 - y_0).abs();
        let y_step = if y_1 > y_0 { 1 } else { -1 };
        let mut error = 0;
        let mut y = y_0;
        for x in x_0..=x_1 {
            if steep {
                self.set_pixel(y, x, color);
            } else {
                self.set_pixel(x, y, color);
            }
            error += derror;
            if error > dx {
                y += y_step;
                error -= 2 * dx;
            }
        }
    }

    /// Copies packed colors into a caller-owned row-major buffer of width * height pixels.
    pub fn copy_to(&self, pixels: &mut [u32]) {
        let mut offset = 0;
        for band in self.bands.iter() {
            let end = (offset + band.color.len()).min(pixels.len());
            pixels[offset..end].copy_from_slice(&band.color[..end - offset]);
            offset = end;
        }
    }

    pub fn copy_depth_into(&self, depth_map: &mut DepthMap) {
        depth_map.width = self.width;
        depth_map.height = self.height;
        depth_map.depth.clear();
        for band in self.bands.iter() {
            depth_map.depth.extend_from_slice(&band.depth);
        }
    }

    /// Rendered colors as rgb8 data, top row first.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(3 * (self.width * self.height) as usize);
        for band in self.bands.iter() {
            for hex in band.color.iter() {
                let color = Color::from_hex(*hex);
                data.extend_from_slice(&[color.r, color.g, color.b]);
            }
        }
        return data;
    }

    /// Depth values normalized to grey levels, closer is brighter. Pixels never drawn to stay black.
    pub fn depth_to_rgb8(&self) -> Vec<u8> {
        let drawn = || {
            self.bands
                .iter()
                .flat_map(|band| band.depth.iter().copied())
                .filter(|depth| *depth != DEPTH_CLEAR && depth.is_finite())
        };
        let z_max = drawn().fold(f32::MIN, f32::max);
        let z_min = drawn().fold(f32::MAX, f32::min);
        let scale = (z_max - z_min).max(f32::EPSILON);

        let mut data = Vec::with_capacity(3 * (self.width * self.height) as usize);
        for band in self.bands.iter() {
            for depth in band.depth.iter() {
                let grey = if *depth == DEPTH_CLEAR || !depth.is_finite() {
                    0
                } else {
                    // Keeping drawn pixels off pure black.
                    (32.0 + (depth - z_min) / scale * 223.0) as u8
                };
                data.extend_from_slice(&[grey, grey, grey]);
            }
        }
        return data;
    }
}
