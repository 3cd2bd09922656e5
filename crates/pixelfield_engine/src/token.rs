//! Shareable position tokens: `#letter(x,y,zoom)`.
//!
//! Tokens round-trip through copy/paste and deep links; the letter
//! names the canvas, the rest restores the camera.

use regex::Regex;

use crate::{CanvasId, CanvasMap, EngineError, Position, Result, clamp_zoom};

lazy_static::lazy_static! {
    static ref TOKEN_REGEX: Regex = Regex::new(r"^#([0-9a-z]+)\((-?\d+),\s*(-?\d+),\s*(-?\d+(?:\.\d+)?)\)$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionToken {
    pub letter: String,
    pub x: i32,
    pub y: i32,
    pub zoom: f64,
}

impl PositionToken {
    pub fn new(letter: impl Into<String>, x: i32, y: i32, zoom: f64) -> Self {
        PositionToken {
            letter: letter.into(),
            x,
            y,
            zoom,
        }
    }

    /// # Errors
    ///
    /// Returns `EngineError::InvalidPositionToken` if the string does not
    /// match the token format.
    pub fn parse(token: &str) -> Result<Self> {
        let cap = TOKEN_REGEX.captures(token.trim()).ok_or_else(|| EngineError::InvalidPositionToken { value: token.to_string() })?;
        let (_, [letter, x, y, zoom]) = cap.extract();
        Ok(PositionToken {
            letter: letter.to_string(),
            x: x.parse()?,
            y: y.parse()?,
            zoom: zoom.parse().map_err(|_| EngineError::InvalidPositionToken { value: token.to_string() })?,
        })
    }

    /// Looks the letter up and clamps the zoom, yielding the values the
    /// controller needs to jump there.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownCanvas` for an unknown letter.
    pub fn resolve(&self, canvases: &CanvasMap) -> Result<(CanvasId, Position, f64)> {
        let canvas = canvases.by_letter(&self.letter).ok_or_else(|| EngineError::UnknownCanvas { ident: self.letter.clone() })?;
        Ok((canvas.id, Position::new(self.x, self.y), clamp_zoom(self.zoom)))
    }
}

impl std::fmt::Display for PositionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.zoom.fract() == 0.0 {
            write!(f, "#{}({},{},{})", self.letter, self.x, self.y, self.zoom as i64)
        } else {
            write!(f, "#{}({},{},{})", self.letter, self.x, self.y, self.zoom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CanvasInfo;

    #[test]
    fn parse_and_format_round_trip() {
        let token = PositionToken::parse("#w(-290,12,10)").unwrap();
        assert_eq!(token, PositionToken::new("w", -290, 12, 10.0));
        assert_eq!(token.to_string(), "#w(-290,12,10)");

        let token = PositionToken::parse("#d(0, -5, 2.5)").unwrap();
        assert_eq!(token.zoom, 2.5);
        assert_eq!(token.to_string(), "#d(0,-5,2.5)");
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        for bad in ["w(-290,12,10)", "#w(-290,12)", "#w(a,b,c)", "#(1,2,3)", "#w[1,2,3]"] {
            assert!(PositionToken::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn resolve_maps_letter_to_canvas_id() {
        let mut info = CanvasInfo {
            id: 7,
            letter: "w".to_string(),
            title: String::new(),
            size: 1024,
            tile_counts: vec![],
            cooldown_ms: 0,
            colors: vec!["#000000".into(), "#ffffff".into()],
            unset_len: 0,
            locked: false,
            bounds: None,
        };
        info.letter = "w".to_string();
        let map = CanvasMap::from_infos(vec![info]).unwrap();

        let token = PositionToken::parse("#w(-290,12,10)").unwrap();
        let (canvas, pos, zoom) = token.resolve(&map).unwrap();
        assert_eq!(canvas, 7);
        assert_eq!(pos, Position::new(-290, 12));
        assert_eq!(zoom, 10.0);

        let token = PositionToken::parse("#q(0,0,1)").unwrap();
        assert!(token.resolve(&map).is_err());
    }
}
