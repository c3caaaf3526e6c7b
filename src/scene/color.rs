use std::ops::{Add, Mul};

/// Struct, representing an rgb8 color.
/// Channels are u8, so they are always in [0, 255] - every arithmetic operation saturates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    pub const fn new(r: u8, g: u8, b: u8) -> Color {
        return Color { r, g, b };
    }

    /// Builds a color from unrestricted float channels, clamping each one into [0, 255].
    /// Same clamping is used by the scaling operator.
    pub fn clamped(r: f32, g: f32, b: f32) -> Color {
        fn clamp_channel(value: f32) -> u8 {
            // NaN ends up as 0 after the cast.
            return value.clamp(0.0, 255.0) as u8;
        }

        return Color {
            r: clamp_channel(r),
            g: clamp_channel(g),
            b: clamp_channel(b),
        };
    }

    /// Packed representation `b + (g << 8) + (r << 16)`.
    pub fn hex(&self) -> u32 {
        return self.b as u32 + ((self.g as u32) << 8) + ((self.r as u32) << 16);
    }

    pub fn from_hex(hex: u32) -> Color {
        return Color {
            r: ((hex >> 16) & 0xff) as u8,
            g: ((hex >> 8) & 0xff) as u8,
            b: (hex & 0xff) as u8,
        };
    }

    /// Get convex combination of two colors: t * c_1 + (1 - t) * c_2.
    /// t is unrestricted, result is clamped.
    pub fn blend(color_1: Color, color_2: Color, t: f32) -> Color {
        return Color::clamped(
            t * color_1.r as f32 + (1.0 - t) * color_2.r as f32,
            t * color_1.g as f32 + (1.0 - t) * color_2.g as f32,
            t * color_1.b as f32 + (1.0 - t) * color_2.b as f32,
        );
    }
}

impl Mul<f32> for Color {
    type Output = Color;

    fn mul(self, k: f32) -> Color {
        return Color::clamped(self.r as f32 * k, self.g as f32 * k, self.b as f32 * k);
    }
}

impl Add<Color> for Color {
    type Output = Color;

    fn add(self, rhs: Color) -> Color {
        return Color {
            r: self.r.saturating_add(rhs.r),
            g: self.g.saturating_add(rhs.g),
            b: self.b.saturating_add(rhs.b),
        };
    }
}
