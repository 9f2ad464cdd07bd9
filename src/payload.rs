//! Typed message payloads.
//!
//! Items store their payload as JSON text tagged by a `type` field. Values that
//! are not a tagged JSON object are legacy plain-text bodies and decode as
//! [`Payload::Text`]. A tagged object with a known type must carry valid
//! fields for that type, otherwise decoding fails.

use serde::{Deserialize, Serialize};
use url::Url;

/// Errors from payload decoding.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload declared a type but its fields did not match.
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Channel-level kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image with optional caption.
    Image,
    /// Video with optional caption.
    Video,
    /// Voice note.
    Audio,
    /// File attachment with optional caption.
    Document,
}

impl MessageKind {
    /// Lowercase name used in logs and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Attachment kinds sent with a filename and caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Generic document attachment.
    Document,
}

impl MediaKind {
    /// Filename used when the media URL has no usable last segment.
    pub fn default_filename(&self) -> &'static str {
        match self {
            Self::Image => "imagem.jpg",
            Self::Video => "video.mp4",
            Self::Document => "documento",
        }
    }

    /// The equivalent [`MessageKind`].
    pub fn message_kind(&self) -> MessageKind {
        match self {
            Self::Image => MessageKind::Image,
            Self::Video => MessageKind::Video,
            Self::Document => MessageKind::Document,
        }
    }
}

/// A decoded item payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// Text message; the body is a template.
    Text {
        /// Template body.
        #[serde(default)]
        text: String,
    },
    /// Image message.
    Image {
        /// Media location.
        #[serde(rename = "imageUrl")]
        url: String,
        /// Optional caption.
        #[serde(rename = "text", default)]
        caption: Option<String>,
    },
    /// Video message.
    Video {
        /// Media location.
        #[serde(rename = "videoUrl")]
        url: String,
        /// Optional caption.
        #[serde(rename = "text", default)]
        caption: Option<String>,
    },
    /// Voice note.
    Audio {
        /// Media location.
        #[serde(rename = "audioUrl")]
        url: String,
    },
    /// Document attachment.
    Document {
        /// Media location.
        #[serde(rename = "documentUrl")]
        url: String,
        /// Optional caption.
        #[serde(rename = "text", default)]
        caption: Option<String>,
    },
}

impl Payload {
    /// Decode a stored payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Invalid`] when `raw` is a JSON object with a
    /// string `type` field that does not describe a valid payload.
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => return Ok(Self::Text { text: raw.to_owned() }),
        };

        let tagged = value
            .as_object()
            .and_then(|obj| obj.get("type"))
            .is_some_and(serde_json::Value::is_string);
        if !tagged {
            return Ok(Self::Text { text: raw.to_owned() });
        }

        serde_json::from_value(value).map_err(|e| PayloadError::Invalid(e.to_string()))
    }

    /// The channel-level kind of this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Video { .. } => MessageKind::Video,
            Self::Audio { .. } => MessageKind::Audio,
            Self::Document { .. } => MessageKind::Document,
        }
    }
}

/// Derive an attachment filename from the last path segment of `location`.
///
/// Accepts absolute URLs and plain filesystem paths. The query string is
/// ignored. Returns `fallback` when no non-empty segment exists.
pub fn filename_from_url(location: &str, fallback: &str) -> String {
    let from_url = Url::parse(location).ok().and_then(|url| {
        url.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_owned))
    });

    let segment = from_url.unwrap_or_else(|| {
        let without_query = location.split(['?', '#']).next().unwrap_or_default();
        without_query
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_owned()
    });

    if segment.is_empty() {
        fallback.to_owned()
    } else {
        segment
    }
}
