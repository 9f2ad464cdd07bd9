//! Channel adapter boundary.
//!
//! The orchestrator hands one fully rendered [`OutboundMessage`] at a time to a
//! [`ChannelAdapter`]. Implementations make exactly one delivery attempt per
//! call and never retry internally.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::payload::{MediaKind, MessageKind};

pub use self::http::HttpChannelAdapter;

/// Errors from the channel adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP request to the channel gateway failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success HTTP status.
    #[error("gateway returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The gateway processed the request but refused to deliver.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Plain text, already templated.
    Text {
        /// Message body.
        body: String,
    },
    /// Image, video or document attachment.
    Media {
        /// Attachment kind.
        media: MediaKind,
        /// URL or path of the media file.
        location: String,
        /// Filename presented to the recipient.
        filename: String,
        /// Caption; empty when absent.
        caption: String,
    },
    /// Voice note.
    Voice {
        /// URL or path of the audio file.
        location: String,
    },
}

impl OutboundMessage {
    /// The channel-level kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Media { media, .. } => media.message_kind(),
            Self::Voice { .. } => MessageKind::Audio,
        }
    }
}

/// Result of a single delivery attempt that reached the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Whether the message was accepted for delivery.
    pub success: bool,
    /// Gateway-provided detail; the failure reason when `success` is false.
    pub message: Option<String>,
    /// Transport message id, when delivered.
    pub id: Option<String>,
}

impl SendReceipt {
    /// A successful receipt carrying the transport message id.
    pub fn delivered(id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: None,
            id: Some(id.into()),
        }
    }

    /// A failed receipt carrying the gateway's reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(reason.into()),
            id: None,
        }
    }
}

/// Delivers messages through the underlying messaging transport.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Send `message` to `target` from the channel session `session_name`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the gateway cannot be reached or
    /// answers with an error status. A reachable gateway that declines the
    /// message returns `Ok` with `success = false`.
    async fn send_message(
        &self,
        session_name: &str,
        target: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, TransportError>;
}
