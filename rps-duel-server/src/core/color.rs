//! Presentation Colour
//!
//! Cosmetic per-player colour. Never consulted by duel logic.

use rand::Rng;
use serde::{Serialize, Deserialize};

/// 8-bit RGB colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    /// Plain white, used before a colour is assigned.
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    /// Create from channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert HSV (all components in `0.0..=1.0`) to RGB.
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = h.rem_euclid(1.0) * 6.0;
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);

        let sector = h.floor();
        let f = h - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));

        let (r, g, b) = match sector as u8 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };

        let to_byte = |c: f32| (c * 255.0).round() as u8;
        Self::new(to_byte(r), to_byte(g), to_byte(b))
    }

    /// Pick a random saturated, bright colour.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let h = rng.gen_range(0.0..1.0);
        let s = rng.gen_range(0.5..=1.0);
        let v = rng.gen_range(0.7..=1.0);
        Self::from_hsv(h, s, v)
    }

    /// `#rrggbb` form for logs and UIs.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}
