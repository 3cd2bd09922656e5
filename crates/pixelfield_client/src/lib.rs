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

//! Networked client layer for the pixelfield engine: the websocket sync
//! channel and its wire protocol, HTTP tile fetching with a bounded
//! priority pool, the gesture state machine, persisted options, and the
//! controller that wires it all to `pixelfield_engine`.

pub mod protocol;

pub mod sync;
pub use sync::{CanvasEvent, ChannelConfig, ChannelHandle, ConnectionState};

pub mod fetch;
pub use fetch::{ChunkService, FetchPool, TileRequest, TileResult};

pub mod input;
pub use input::{Intent, InteractionController, Key, ModifierRole, PointerEvent};

mod state;
pub use state::{AppState, HistorySelection};

mod settings;
pub use settings::{Options, OverlayPreset, SavedPosition};

mod controller;
pub use controller::{CanvasController, HostSink, NullHost};
