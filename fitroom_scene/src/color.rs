//! RGB tint colors, parsed from the `#rrggbb` strings the collaborator
//! supplies.

use anyhow::{Result, bail};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (leading `#` optional, case-insensitive).
    pub fn from_hex(text: &str) -> Result<Self> {
        let hex = text.strip_prefix('#').unwrap_or(text);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("expected an #rrggbb color, got '{text}'");
        }
        let channel = |at: usize| -> f32 {
            u8::from_str_radix(&hex[at..at + 2], 16).unwrap_or(0) as f32 / 255.0
        };
        Ok(Self {
            r: channel(0),
            g: channel(2),
            b: channel(4),
        })
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    /// sRGB components converted to linear light, for upload into an sRGB
    /// render target.
    pub fn to_linear(self) -> [f32; 3] {
        fn linear(channel: f32) -> f32 {
            if channel <= 0.04045 {
                channel / 12.92
            } else {
                ((channel + 0.055) / 1.055).powf(2.4)
            }
        }
        [linear(self.r), linear(self.g), linear(self.b)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_hash() {
        let red = Color::from_hex("#ff0000").expect("parsed");
        assert_eq!(red, Color::new(1.0, 0.0, 0.0));
        assert_eq!(Color::from_hex("ff0000").expect("parsed"), red);
        let grey = Color::from_hex("#808080").expect("parsed");
        assert!((grey.r - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Color::from_hex("#f00").is_err());
        assert!(Color::from_hex("#gg0000").is_err());
        assert!(Color::from_hex("").is_err());
    }

    #[test]
    fn linear_conversion_keeps_extremes() {
        let white = Color::WHITE.to_linear();
        assert!((white[0] - 1.0).abs() < 1e-6);
        let black = Color::new(0.0, 0.0, 0.0).to_linear();
        assert_eq!(black, [0.0, 0.0, 0.0]);
    }
}
