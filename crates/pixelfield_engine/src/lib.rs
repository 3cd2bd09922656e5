#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_precision_loss,
    clippy::must_use_candidate,
    clippy::struct_excessive_bools,
    clippy::return_self_not_must_use,
    clippy::module_name_repetitions
)]

//! Core engine for a shared, persistent pixel canvas: viewport math,
//! multi-resolution tile caching, optimistic pixel mutations with
//! rollback, and a dirty-flag software compositor. Everything here is
//! synchronous and single-owner; the networked layers live in
//! `pixelfield_client`.

/// Logical edge length of a base tile; also the raster edge of LOD tiles.
pub const CHUNK_SIZE: i32 = 256;

/// Screen pixels per logical pixel at zoom 1 (the closest view).
pub const BASE_PIXEL_SIZE: f64 = 40.0;

/// Closest legal zoom.
pub const MIN_ZOOM: f64 = 1.0;

/// Exclusive upper zoom bound (farthest view).
pub const MAX_ZOOM: f64 = 1024.0;

mod error;
pub use error::*;

mod position;
pub use position::*;

mod palette;
pub use palette::*;

mod canvas;
pub use canvas::*;

mod viewport;
pub use viewport::*;

mod chunk;
pub use chunk::*;

pub mod chunk_store;
pub use chunk_store::{ChunkStore, DEFAULT_CACHE_CAPACITY, PlaceResult};

mod mutation;
pub use mutation::*;

mod activity;
pub use activity::*;

mod render;
pub use render::*;

mod token;
pub use token::*;
