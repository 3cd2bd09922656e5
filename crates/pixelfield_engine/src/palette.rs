use std::fmt::Display;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

lazy_static::lazy_static! {
    static ref HEX_REGEX: Regex = Regex::new(r"^#?([0-9a-fA-F]{2})([0-9a-fA-F]{2})([0-9a-fA-F]{2})$").unwrap();
}

/// Index into a canvas palette. The wire protocol transfers pixels as
/// these indices, never as raw RGB.
pub type ColorIndex = u8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{Color: r={:02X}, g={:02X}, b={:02X}}}", self.r, self.g, self.b)
    }
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    pub fn get_rgb(&self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Parses `#rrggbb` (leading `#` optional).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidHexColor` if the string is not a six
    /// digit hex triplet.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if let Some(cap) = HEX_REGEX.captures(hex) {
            let (_, [r, g, b]) = cap.extract();
            let r = u8::from_str_radix(r, 16)?;
            let g = u8::from_str_radix(g, 16)?;
            let b = u8::from_str_radix(b, 16)?;
            Ok(Color::new(r, g, b))
        } else {
            Err(EngineError::InvalidHexColor { value: hex.to_string() })
        }
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Color::new(r, g, b)
    }
}

/// An ordered list of paintable colors for one canvas.
///
/// The authority treats the first `unset_len` entries as "empty ground"
/// shades: they are rendered like any other color but cannot be selected
/// as a paint color, and in eraser mode they read as transparent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    colors: Vec<Color>,
    #[serde(default)]
    unset_len: usize,
}

impl Palette {
    pub fn new(colors: Vec<Color>, unset_len: usize) -> Self {
        Palette { colors, unset_len }
    }

    /// Builds a palette from `#rrggbb` strings, as delivered in the
    /// canvas descriptor JSON.
    pub fn from_hex_list(hex: &[String], unset_len: usize) -> Result<Self> {
        let colors = hex.iter().map(|h| Color::from_hex(h)).collect::<Result<Vec<_>>>()?;
        Ok(Palette { colors, unset_len })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Number of leading "empty ground" entries that cannot be painted.
    pub fn unset_len(&self) -> usize {
        self.unset_len
    }

    /// First index a user may actually paint with.
    pub fn first_paintable(&self) -> ColorIndex {
        self.unset_len.min(self.colors.len().saturating_sub(1)) as ColorIndex
    }

    pub fn is_paintable(&self, index: ColorIndex) -> bool {
        (index as usize) >= self.unset_len && (index as usize) < self.colors.len()
    }

    /// Whether the index reads as "empty" (background) in eraser mode.
    pub fn is_unset(&self, index: ColorIndex) -> bool {
        (index as usize) < self.unset_len
    }

    pub fn get(&self, index: ColorIndex) -> Result<Color> {
        self.colors.get(index as usize).copied().ok_or(EngineError::ColorIndexOutOfRange {
            index: index as usize,
            len: self.colors.len(),
        })
    }

    pub fn get_rgb(&self, index: ColorIndex) -> (u8, u8, u8) {
        self.colors.get(index as usize).map(Color::get_rgb).unwrap_or((0, 0, 0))
    }

    /// Exact index lookup. Returns the first matching entry.
    pub fn index_of(&self, color: Color) -> Option<ColorIndex> {
        self.colors.iter().position(|c| *c == color).map(|i| i as ColorIndex)
    }

    /// Nearest entry by squared RGB distance; used when decoding image
    /// tiles or snapping overlay colors onto the palette.
    pub fn nearest(&self, color: Color) -> ColorIndex {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            let dr = c.r as i32 - color.r as i32;
            let dg = c.g as i32 - color.g as i32;
            let db = c.b as i32 - color.b as i32;
            let dist = (dr * dr + dg * dg + db * db) as u32;
            if dist < best_dist {
                best_dist = dist;
                best = i;
                if dist == 0 {
                    break;
                }
            }
        }
        best as ColorIndex
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_palette() -> Palette {
        Palette::new(
            vec![
                Color::new(0xCA, 0xE3, 0xFF), // unset light
                Color::new(0xFF, 0xFF, 0xFF),
                Color::new(0x00, 0x00, 0x00),
                Color::new(0xFF, 0x00, 0x00),
            ],
            1,
        )
    }

    #[test]
    fn hex_round_trip() {
        let c = Color::from_hex("#ff00a0").unwrap();
        assert_eq!(c.to_hex(), "#ff00a0");
        assert!(Color::from_hex("ff00a0").is_ok());
        assert!(Color::from_hex("#ff00a").is_err());
        assert!(Color::from_hex("red").is_err());
    }

    #[test]
    fn index_and_nearest_lookup() {
        let pal = test_palette();
        assert_eq!(pal.index_of(Color::from_hex("#FF0000").unwrap()), Some(3));
        assert_eq!(pal.index_of(Color::new(1, 2, 3)), None);
        assert_eq!(pal.nearest(Color::new(0xF0, 0x10, 0x10)), 3);
        assert_eq!(pal.nearest(Color::new(0x05, 0x05, 0x05)), 2);
    }

    #[test]
    fn unset_entries_are_not_paintable() {
        let pal = test_palette();
        assert!(!pal.is_paintable(0));
        assert!(pal.is_paintable(1));
        assert!(pal.is_unset(0));
        assert!(!pal.is_unset(1));
        assert_eq!(pal.first_paintable(), 1);
    }
}
