//! Protocol constants
//!
//! Closed enums and limits shared between the hub and its clients.

use serde::{Deserialize, Serialize};

/// Maximum number of messages queued for a single slow consumer.
pub const MAX_PENDING_MESSAGES: usize = 256;

/// Maximum serialized broadcast payload size in bytes (inclusive).
pub const MAX_PAYLOAD_SIZE: usize = 2048;

/// Positive full scale of a signed 16-bit sample. Negative samples divide
/// by `PCM16_MAX + 1.0` to preserve the asymmetry of the i16 range.
pub const PCM16_MAX: f32 = 32767.0;

/// Self-declared client type.
///
/// Unrecognized strings normalize to `Unknown`; the hub never rejects a
/// connection over its declared type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Controller,
    Visualiser,
    Mobile,
    Display,
    Api,
    #[default]
    Unknown,
}

impl ClientType {
    /// Parse a declared type string. Returns `None` for unrecognized values
    /// so callers can decide whether to warn before normalizing.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "controller" => Some(Self::Controller),
            "visualiser" => Some(Self::Visualiser),
            "mobile" => Some(Self::Mobile),
            "display" => Some(Self::Display),
            "api" => Some(Self::Api),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// The wire representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Visualiser => "visualiser",
            Self::Mobile => "mobile",
            Self::Display => "display",
            Self::Api => "api",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a client-to-client broadcast. Closed set; anything else is
/// rejected at schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastType {
    VisualiserControl,
    SceneSync,
    ColorPalette,
    Custom,
}

impl BroadcastType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisualiserControl => "visualiser_control",
            Self::SceneSync => "scene_sync",
            Self::ColorPalette => "color_palette",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for BroadcastType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that cannot be subscribed to over the hub, with the alternative
/// the client should use instead.
const NON_SUBSCRIBABLE_EVENTS: &[(&str, &str)] =
    &[("device_update", "Use visualisation_update instead")];

/// Returns the hint for a non-subscribable event type, or `None` if the
/// event type is subscribable.
pub fn non_subscribable_hint(event_type: &str) -> Option<&'static str> {
    NON_SUBSCRIBABLE_EVENTS
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, hint)| *hint)
}
