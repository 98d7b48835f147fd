use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A typed, self-describing unit exchanged over the persistent connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Server-relayed camera frame
    #[serde(rename = "frame")]
    Frame { data: String },

    /// Image analysis request carrying the latest frame and a prompt
    #[serde(rename = "process_image")]
    ProcessImage { image_data: String, prompt: String },

    /// Analysis response correlated to the pending request
    #[serde(rename = "llm_response")]
    LlmResponse { data: LlmOutcome },

    /// Remote-side failure report
    #[serde(rename = "error")]
    Error { message: String },
}

/// Payload of an `llm_response` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmOutcome {
    pub response: String,
    /// Model confidence on a 0-1 scale
    pub confidence: f64,
    /// Server-side processing time in seconds
    pub processing_time: f64,
}

const KNOWN_TYPES: [&str; 4] = ["frame", "process_image", "llm_response", "error"];

/// Serialize an envelope to its wire form
pub fn encode(envelope: &Envelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

/// Decode an inbound text payload.
///
/// Unknown envelope types are ignored and malformed payloads are dropped;
/// neither condition closes the connection.
pub fn decode(text: &str) -> Option<Envelope> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping unparseable payload: {}", e);
            return None;
        }
    };

    let envelope_type = value.get("type").and_then(|t| t.as_str());
    match envelope_type {
        Some(t) if !KNOWN_TYPES.contains(&t) => {
            debug!("Ignoring envelope of unknown type '{}'", t);
            return None;
        }
        None => {
            warn!("Dropping payload without a type discriminator");
            return None;
        }
        _ => {}
    }

    match serde_json::from_value::<Envelope>(value.clone()) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(
                "Dropping malformed '{}' envelope: {}",
                envelope_type.unwrap_or("?"),
                e
            );
            None
        }
    }
}
