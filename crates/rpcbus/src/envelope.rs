use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The single wire entity exchanged between an [`crate::Client`] and a
/// [`crate::Server`].
///
/// On the wire an envelope is `header 0x0A body`: the header is a JSON object
/// using short field tags (see [`EnvelopeHeader`]), followed by exactly one
/// newline byte, followed by the opaque body. The body is never escaped or
/// interpreted, so it may itself contain newline bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Application-level operation name. Set on requests, empty on replies.
    pub method: String,
    /// Topic the server should publish the reply to. Empty means the
    /// request is fire-and-forget and no reply is expected.
    pub reply_to: String,
    /// Correlation id chosen by the client and echoed back in the reply.
    pub correlation_id: u32,
    /// Unix timestamp (seconds) after which the request is stale. `<= 0`
    /// means the request never expires.
    pub expires_at: i64,
    /// Application-level error message. Set only on replies that represent
    /// an application failure.
    pub error: String,
    /// Opaque application payload.
    pub body: Vec<u8>,
}

/// The JSON header shape, using the wire's short field tags.
#[derive(Serialize, Deserialize, Default)]
struct EnvelopeHeader {
    #[serde(rename = "m", default, skip_serializing_if = "String::is_empty")]
    method: String,
    #[serde(rename = "r", default, skip_serializing_if = "String::is_empty")]
    reply_to: String,
    #[serde(rename = "c", default, skip_serializing_if = "is_zero_u32")]
    correlation_id: u32,
    #[serde(rename = "x", default, skip_serializing_if = "is_zero_i64")]
    expires_at: i64,
    #[serde(rename = "e", default, skip_serializing_if = "String::is_empty")]
    error: String,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

/// Errors encoding or decoding an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope header: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Envelope {
    /// Builds the wire representation: `header_json 0x0A body`.
    pub fn encode(&self) -> Vec<u8> {
        let header = EnvelopeHeader {
            method: self.method.clone(),
            reply_to: self.reply_to.clone(),
            correlation_id: self.correlation_id,
            expires_at: self.expires_at,
            error: self.error.clone(),
        };
        // Header fields are plain strings/integers; serialization cannot
        // fail for this shape.
        let mut buf = serde_json::to_vec(&header).expect("envelope header always serializes");
        buf.push(b'\n');
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Parses the wire representation produced by [`Envelope::encode`].
    ///
    /// Splits on the *first* `0x0A` byte only; everything after it is taken
    /// verbatim as the body, including any further newline bytes. A buffer
    /// with no newline at all is treated as a header with an empty body.
    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        let (header_bytes, body) = match buf.iter().position(|&b| b == b'\n') {
            Some(idx) => (&buf[..idx], buf[idx + 1..].to_vec()),
            None => (buf, Vec::new()),
        };
        let header: EnvelopeHeader = serde_json::from_slice(header_bytes)?;
        Ok(Envelope {
            method: header.method,
            reply_to: header.reply_to,
            correlation_id: header.correlation_id,
            expires_at: header.expires_at,
            error: header.error,
            body,
        })
    }

    /// `true` iff this envelope carries an expiry and it has already passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at > 0 && now_unix() > self.expires_at
    }

    /// Builds the reply envelope for this request: same correlation id,
    /// given body/error, with `method`/`reply_to`/`expires_at` cleared.
    pub fn reply(&self, body: Vec<u8>, error: Option<String>) -> Envelope {
        Envelope {
            method: String::new(),
            reply_to: String::new(),
            correlation_id: self.correlation_id,
            expires_at: 0,
            error: error.unwrap_or_default(),
            body,
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
