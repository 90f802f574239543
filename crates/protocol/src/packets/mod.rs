//! Representative packet shapes for protocol 47.

mod handshake;
mod login;
mod play;
mod status;

pub use handshake::{Handshake, PROTOCOL_VERSION};
pub use login::{LoginDisconnect, LoginStart};
pub use play::{
    Chat, ChatMessage, ChatPosition, CombatEvent, Disconnect, EntityHeadLook, KeepAlive,
    PlayerPosLook, UnloadChunk, strip_colors,
};
pub use status::{StatusPing, StatusPong, StatusRequest, StatusResponse};

/// Wrap plain text in a JSON chat component.
pub fn text_component(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}
