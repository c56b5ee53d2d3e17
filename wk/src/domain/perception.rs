//! Perception types - what the engine saw on each iteration

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Stable SHA-256 hex digest of observed application state
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A raw capture of application state, owned by the caller
///
/// `payload` is opaque to the engine (typically a base64 screenshot). The
/// optional text fields are what the decider and the checkpoint evaluator read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub payload: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub visible_text: Option<String>,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub ui_context: Option<String>,
}

impl Capture {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_visible_text(mut self, text: impl Into<String>) -> Self {
        self.visible_text = Some(text.into());
        self
    }

    pub fn with_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements = elements.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ui_context(mut self, context: impl Into<String>) -> Self {
        self.ui_context = Some(context.into());
        self
    }

    /// Bytes hashed into the fingerprint: payload, then each text field
    /// separated by NUL so that shifting text between fields changes the hash
    fn fingerprint_material(&self) -> Vec<u8> {
        let mut material = Vec::with_capacity(self.payload.len() + 64);
        material.extend_from_slice(self.payload.as_bytes());
        for part in [self.url.as_deref(), self.visible_text.as_deref()] {
            material.push(0);
            material.extend_from_slice(part.unwrap_or_default().as_bytes());
        }
        for element in &self.elements {
            material.push(0);
            material.extend_from_slice(element.as_bytes());
        }
        material
    }
}

/// One perception: fingerprint, time, and a shared handle to the capture
#[derive(Debug, Clone)]
pub struct PerceptionRecord {
    pub fingerprint: String,
    pub captured_at: DateTime<Utc>,
    pub capture: Arc<Capture>,
}

impl PerceptionRecord {
    /// Build a record with an externally computed fingerprint
    pub fn new(fingerprint: impl Into<String>, capture: Capture) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            captured_at: Utc::now(),
            capture: Arc::new(capture),
        }
    }

    /// Build a record, fingerprinting the capture's payload and text content
    pub fn from_capture(capture: Capture) -> Self {
        let fingerprint = fingerprint(&capture.fingerprint_material());
        debug!(%fingerprint, "PerceptionRecord::from_capture: called");
        Self {
            fingerprint,
            captured_at: Utc::now(),
            capture: Arc::new(capture),
        }
    }

    pub fn ui_context(&self) -> Option<&str> {
        self.capture.ui_context.as_deref()
    }
}
