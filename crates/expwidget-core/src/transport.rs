//! Transport collaborator and experiment service endpoints.

use crate::creative::CreativeId;
use serde_json::{json, Value};
use std::fmt::Write as _;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Non-success HTTP status
    #[error("API request failed: {status} {status_text}")]
    Status {
        /// HTTP status code
        status: u16,
        /// HTTP status text
        status_text: String,
    },
    /// Request never completed
    #[error("network error: {0}")]
    Network(String),
    /// Response body was not the expected JSON
    #[error("invalid response body: {0}")]
    Decode(String),
    /// The transport does not implement this operation
    #[error("operation not supported by this transport")]
    Unsupported,
}

/// Requests to the experiment service.
///
/// Paths are relative to the configured API base.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// GET and parse a JSON body.
    async fn get(&self, path: &str) -> Result<Value, TransportError>;

    /// POST a JSON body and parse the JSON response.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError>;

    /// Queue a POST that must not block the caller and should survive page
    /// unload. Returns whether the request was queued.
    fn send_fire_and_forget(&self, path: &str, body: &Value) -> bool;

    /// Fetch an image and return it as a `data:` URL.
    async fn fetch_image_data(&self, url: &str) -> Result<String, TransportError> {
        let _ = url;
        Err(TransportError::Unsupported)
    }
}

/// Paths of the experiment service endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    experiment: String,
}

impl Endpoints {
    /// Endpoints for one experiment.
    #[must_use]
    pub fn new(experiment_id: &str) -> Self {
        Self {
            experiment: format!("/experiments/{}", encode_uri_component(experiment_id)),
        }
    }

    /// `GET /experiments/{id}/assign?user_key=<key>`
    #[must_use]
    pub fn assign(&self, user_key: &str) -> String {
        format!(
            "{}/assign?user_key={}",
            self.experiment,
            encode_uri_component(user_key)
        )
    }

    /// `POST /experiments/{id}/hit`
    #[must_use]
    pub fn hit(&self) -> String {
        format!("{}/hit", self.experiment)
    }

    /// `POST /experiments/{id}/click`
    #[must_use]
    pub fn click(&self) -> String {
        format!("{}/click", self.experiment)
    }
}

/// Telemetry body: `{ "creative_id": <canonical id> }`.
#[must_use]
pub fn creative_payload(id: &CreativeId) -> Value {
    json!({ "creative_id": id })
}

/// Percent-encode everything except the URI-component unreserved set.
#[must_use]
pub fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(char::from(byte)),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}
