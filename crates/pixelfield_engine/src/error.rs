//! Unified error types for pixelfield_engine

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    // === Raster / tile errors ===
    #[error("Chunk payload has {len} bytes, expected {expected}")]
    ChunkSizeMismatch { len: usize, expected: usize },

    #[error("Chunk ({cx},{cy}) is outside the canvas bounding box")]
    ChunkOutOfBounds { cx: i32, cy: i32 },

    #[error("Level {level} out of range (0..{max})")]
    LevelOutOfRange { level: usize, max: usize },

    // === Palette errors ===
    #[error("Invalid hex color: {value}")]
    InvalidHexColor { value: String },

    #[error("Color index {index} out of palette range (0..{len})")]
    ColorIndexOutOfRange { index: usize, len: usize },

    // === Canvas errors ===
    #[error("Unknown canvas: {ident}")]
    UnknownCanvas { ident: String },

    #[error("Canvas descriptor invalid: {message}")]
    InvalidCanvas { message: String },

    // === Token errors ===
    #[error("Invalid position token: {value}")]
    InvalidPositionToken { value: String },

    // === External errors ===
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse int error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("{0}")]
    Generic(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a generic error from any displayable type
    pub fn generic(msg: impl std::fmt::Display) -> Self {
        Self::Generic(msg.to_string())
    }
}
