//! HTTP client for the channel gateway.
//!
//! The gateway exposes one POST endpoint per message kind under
//! `{base_url}/{session}/...` and answers `{ "status": bool, "message": any }`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ChannelAdapter, OutboundMessage, SendReceipt, TransportError};
use crate::payload::MediaKind;

/// Maximum characters of an error body kept in [`TransportError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Response envelope from the gateway.
#[derive(Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: serde_json::Value,
}

/// [`ChannelAdapter`] that talks to the channel gateway over HTTP.
pub struct HttpChannelAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChannelAdapter {
    /// Create an adapter for the gateway at `base_url`.
    pub fn new(base_url: &str, connect_timeout_secs: u64, request_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the gateway base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, session_name: &str, path: &str) -> String {
        format!("{}/{session_name}/{path}", self.base_url)
    }
}

/// Strip everything but digits from a contact identifier.
pub fn telnumber(contact: &str) -> String {
    contact.chars().filter(char::is_ascii_digit).collect()
}

/// Gateway path and JSON body for a message.
pub fn request_for(target: &str, message: &OutboundMessage) -> (&'static str, serde_json::Value) {
    let telnumber = telnumber(target);
    match message {
        OutboundMessage::Text { body } => (
            "sendmessage",
            serde_json::json!({ "telnumber": telnumber, "message": body }),
        ),
        OutboundMessage::Media {
            media: MediaKind::Image,
            location,
            filename,
            caption,
        } => (
            "sendimage",
            serde_json::json!({
                "telnumber": telnumber,
                "imagePath": location,
                "filename": filename,
                "caption": caption,
            }),
        ),
        OutboundMessage::Media {
            media: MediaKind::Video,
            location,
            filename,
            caption,
        } => (
            "sendvideo",
            serde_json::json!({
                "telnumber": telnumber,
                "videoPath": location,
                "filename": filename,
                "caption": caption,
            }),
        ),
        OutboundMessage::Media {
            media: MediaKind::Document,
            location,
            filename,
            caption,
        } => (
            "senddocument",
            serde_json::json!({
                "telnumber": telnumber,
                "filePath": location,
                "filename": filename,
                "caption": caption,
            }),
        ),
        OutboundMessage::Voice { location } => (
            "sendptt",
            serde_json::json!({ "telnumber": telnumber, "audioPath": location }),
        ),
    }
}

#[async_trait]
impl ChannelAdapter for HttpChannelAdapter {
    async fn send_message(
        &self,
        session_name: &str,
        target: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, TransportError> {
        let (path, body) = request_for(target, message);
        let url = self.endpoint(session_name, path);

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let truncated: String = body_text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(%status, session = session_name, path, "gateway send failed");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncated,
            });
        }

        let reply: GatewayResponse = resp.json().await?;
        let detail = match reply.message {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        };

        debug!(
            session = session_name,
            kind = message.kind().as_str(),
            success = reply.status,
            "gateway replied"
        );

        if reply.status {
            Ok(SendReceipt {
                success: true,
                message: None,
                id: detail,
            })
        } else {
            Ok(SendReceipt {
                success: false,
                message: detail,
                id: None,
            })
        }
    }
}
