//! Message bus plumbing between the sandbox and the host.
//!
//! The sandbox reaches the host through exactly two one-way channels: a
//! navigation-completion signal carrying the loaded URL, and a posted
//! message carrying a JSON object `{type, step?, ok?, ...}`. The two are
//! independent and unsynchronized; neither is trusted alone. Malformed or
//! non-JSON message bodies are discarded silently.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::record::ExtractedFields;

/// One of the two external event sources feeding the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxSignal {
    /// A page load completed inside the sandbox.
    NavigationCompleted { url: String },
    /// The sandbox posted a message body (raw, possibly malformed).
    Message { body: String },
}

/// One-way handle to the sandboxed page surface. Injection carries no
/// return value and navigation is fire-and-forget; all host-side effects
/// happen only when an outcome message arrives.
pub trait SandboxHandle: Send + Sync {
    fn inject(&self, script: &str);
    fn navigate(&self, url: &str);
}

/// Step identifier carried in `process` outcome messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepId {
    Submit,
    Result,
    Extract,
    LookupFill,
    LookupSubmit,
    LookupResult,
}

/// Payload of a `process` outcome message. Every injected instruction
/// posts exactly one terminal message of this shape (plus intermediate
/// `submit` progress for the combined fill+submit instruction).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayload {
    #[serde(default)]
    pub ok: bool,
    pub candidate: Option<String>,
    pub reason: Option<String>,
    /// Raw result text, classified host-side against the flow's phrase
    /// categories.
    pub text: Option<String>,
    /// Extracted detail fields (extract step).
    pub fields: Option<ExtractedFields>,
    /// Registry lookup result fields.
    pub name: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    /// Eligibility verdict from the obstacle/consent detector.
    pub eligible: Option<bool>,
    pub attempts: Option<u32>,
    pub url: Option<String>,
}

/// Payload of a `pageCheck` message from the detail-readiness probe.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCheckPayload {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub has_primary_id: bool,
    #[serde(default)]
    pub has_birthdate: bool,
    #[serde(default)]
    pub has_name: bool,
    pub url: Option<String>,
}

/// Typed view of a sandbox message body.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SandboxMessage {
    Process {
        step: StepId,
        #[serde(flatten)]
        payload: ProcessPayload,
    },
    PageCheck(PageCheckPayload),
    /// Explicit lock release posted by an instruction that failed after
    /// its terminal outcome (extraction budget exhaustion).
    Unlock { step: StepId },
    /// Informational notice from the post-login redirect helper.
    AutoRedirect {
        phase: Option<String>,
        url: Option<String>,
    },
}

/// Decode a message body, discarding anything malformed.
pub fn parse_message(body: &str) -> Option<SandboxMessage> {
    match serde_json::from_str::<SandboxMessage>(body) {
        Ok(msg) => Some(msg),
        Err(err) => {
            trace!("discarding malformed sandbox message: {}", err);
            None
        }
    }
}

/// Normalize a URL for dedupe comparison (trailing slashes stripped).
pub fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Append a timestamp query parameter so a reload of an already-visited
/// URL produces a fresh navigation-completion event and re-arms the
/// (step-group, URL) dedupe check.
pub fn with_cache_buster(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}t={}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_result_process_message() {
        let body = r#"{"type":"process","step":"result","ok":true,"candidate":"2409000123","text":"terdaftar sebagai peserta"}"#;
        match parse_message(body) {
            Some(SandboxMessage::Process { step, payload }) => {
                assert_eq!(step, StepId::Result);
                assert!(payload.ok);
                assert_eq!(payload.candidate.as_deref(), Some("2409000123"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_page_check_message() {
        let body = r#"{"type":"pageCheck","ready":true,"hasPrimaryId":true,"hasName":true,"url":"https://example.org/detail"}"#;
        match parse_message(body) {
            Some(SandboxMessage::PageCheck(p)) => {
                assert!(p.ready && p.has_primary_id && p.has_name);
                assert!(!p.has_birthdate);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn malformed_bodies_are_discarded() {
        assert!(parse_message("not json at all").is_none());
        assert!(parse_message("{\"type\":\"mystery\"}").is_none());
        assert!(parse_message("").is_none());
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize_url("https://a.example/x//"), "https://a.example/x");
        assert_eq!(normalize_url("https://a.example"), "https://a.example");
    }

    #[test]
    fn cache_buster_picks_separator() {
        assert!(with_cache_buster("https://a.example/form").contains("/form?t="));
        assert!(with_cache_buster("https://a.example/form?x=1").contains("&t="));
    }
}
