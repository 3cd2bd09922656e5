//! Wire protocol for the canvas sync channel.
//!
//! Every frame on the duplex connection is a JSON envelope
//! `{ "type": <tag>, "data": <payload> }`. This module defines the typed
//! payloads for each tag and the parsing/building helpers; the transport
//! lives in [`crate::sync`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use pixelfield_engine::{CanvasId, CanvasInfo, ColorIndex};

/// Message tags understood on the inbound side.
pub mod tags {
    pub const INIT: &str = "init";
    pub const PLACE_PIXEL: &str = "placePixel";
    pub const PLAYER_NB: &str = "playerNb";
    pub const CONFIRM_PIXEL: &str = "confirmPixel";
    pub const REFUSE_PIXEL: &str = "refusePixel";
    pub const CAPTCHA_NEEDED: &str = "captchaNeeded";
    pub const REFRESH_CHUNKS: &str = "refreshChunks";
    pub const CHAT_MESSAGE: &str = "chatMessage";
    pub const CLEAR_CHAT_MESSAGES: &str = "clearChatMessages";
    pub const NEW_NOTIFICATION: &str = "newNotification";
    pub const DISCONNECT: &str = "disconnect";
}

/// Disconnect reason that marks the session as unrecoverable.
pub const BAD_CONNECTION_REASON: &str = "bad connection request";

/// A chat line, either from the backlog or live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    #[serde(default)]
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub time: u64,
}

/// Session bootstrap sent once the channel is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    #[serde(rename = "playerCount", default)]
    pub player_count: u32,
    /// Cooldown per canvas id, milliseconds.
    #[serde(default)]
    pub cooldowns: std::collections::HashMap<CanvasId, u64>,
    #[serde(default)]
    pub chat: Vec<ChatEntry>,
    #[serde(rename = "lastNotification", default)]
    pub last_notification: Option<u64>,
    /// Canvas descriptors; may be empty when the client already has them.
    #[serde(default)]
    pub canvases: Vec<CanvasInfo>,
}

/// A pixel echo for somebody's confirmed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelEcho {
    pub canvas: CanvasId,
    pub x: i32,
    pub y: i32,
    pub color: ColorIndex,
}

/// Verdict payload for one of our own writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmPayload {
    /// Milliseconds until the next write is allowed.
    #[serde(default)]
    pub cooldown: u64,
    #[serde(rename = "totalPixels", default)]
    pub total_pixels: u64,
    #[serde(rename = "dailyPixels", default)]
    pub daily_pixels: u64,
    pub pos: [i32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusePayload {
    #[serde(default)]
    pub cooldown: u64,
    #[serde(default)]
    pub reason: String,
    pub pos: [i32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaPayload {
    pub pos: [i32; 2],
}

/// One tile the authority wants reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub canvas: CanvasId,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub time: u64,
}

/// A fully parsed inbound message.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Init(Box<InitPayload>),
    PlacePixel(PixelEcho),
    PlayerCount(u32),
    ConfirmPixel(ConfirmPayload),
    RefusePixel(RefusePayload),
    CaptchaNeeded(CaptchaPayload),
    RefreshChunks(Vec<ChunkRef>),
    Chat(ChatEntry),
    ClearChatMessages,
    NewNotification(NotificationPayload),
    Disconnect { reason: String },
    Unknown(String),
}

/// Parses one inbound frame.
///
/// # Errors
///
/// Fails when the envelope is not valid JSON or a known tag carries a
/// payload of the wrong shape.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(rename = "type")]
        tag: String,
        #[serde(default)]
        data: Value,
    }

    let envelope: Envelope = serde_json::from_str(text)?;
    let msg = match envelope.tag.as_str() {
        tags::INIT => ServerMessage::Init(Box::new(serde_json::from_value(envelope.data)?)),
        tags::PLACE_PIXEL => ServerMessage::PlacePixel(serde_json::from_value(envelope.data)?),
        tags::PLAYER_NB => {
            #[derive(Deserialize)]
            struct Count {
                count: u32,
            }
            let count: Count = serde_json::from_value(envelope.data)?;
            ServerMessage::PlayerCount(count.count)
        }
        tags::CONFIRM_PIXEL => ServerMessage::ConfirmPixel(serde_json::from_value(envelope.data)?),
        tags::REFUSE_PIXEL => ServerMessage::RefusePixel(serde_json::from_value(envelope.data)?),
        tags::CAPTCHA_NEEDED => ServerMessage::CaptchaNeeded(serde_json::from_value(envelope.data)?),
        tags::REFRESH_CHUNKS => ServerMessage::RefreshChunks(serde_json::from_value(envelope.data)?),
        tags::CHAT_MESSAGE => ServerMessage::Chat(serde_json::from_value(envelope.data)?),
        tags::CLEAR_CHAT_MESSAGES => ServerMessage::ClearChatMessages,
        tags::NEW_NOTIFICATION => ServerMessage::NewNotification(serde_json::from_value(envelope.data)?),
        tags::DISCONNECT => {
            #[derive(Deserialize)]
            struct Reason {
                #[serde(default)]
                reason: String,
            }
            let reason: Reason = serde_json::from_value(envelope.data)?;
            ServerMessage::Disconnect { reason: reason.reason }
        }
        other => ServerMessage::Unknown(other.to_string()),
    };
    Ok(msg)
}

/// Serializes an outbound envelope.
pub fn to_envelope(tag: &str, data: Value) -> String {
    json!({ "type": tag, "data": data }).to_string()
}

/// Request to paint one pixel with the active color.
pub fn place_pixel_request(canvas: CanvasId, x: i32, y: i32, color: ColorIndex) -> String {
    to_envelope(tags::PLACE_PIXEL, json!({ "canvas": canvas, "x": x, "y": y, "color": color }))
}

/// Outbound chat line.
pub fn chat_request(message: &str) -> String {
    to_envelope(tags::CHAT_MESSAGE, json!({ "message": message }))
}
