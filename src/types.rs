// types.rs - Shared data types for credential runs
// Purpose: Credential pairs, attempt results and run progress that flow
//          between the executor, the scheduler and the event stream

use serde::{Deserialize, Serialize};
use std::fmt;

/// One (identifier, secret) pair to submit against the login endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub identifier: String,
    pub secret: String,
}

impl CredentialPair {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// Secret reduced to its first character, for log lines
    pub fn masked_secret(&self) -> String {
        match self.secret.chars().next() {
            Some(first) => format!("{}***", first),
            None => "<empty>".to_string(),
        }
    }
}

/// Index-aligned pairing of two lists: entry i of `identifiers` goes with
/// entry i of `secrets`. Extra entries of the longer list are ignored.
pub fn align_pairs(identifiers: &[String], secrets: &[String]) -> Vec<CredentialPair> {
    identifiers
        .iter()
        .zip(secrets.iter())
        .map(|(identifier, secret)| CredentialPair::new(identifier.clone(), secret.clone()))
        .collect()
}

/// Verdict taxonomy for a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
    #[serde(rename = "2fa_required")]
    TwoFactorRequired,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "unknown")]
    Unknown,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
            AttemptStatus::TwoFactorRequired => "2fa_required",
            AttemptStatus::Error => "error",
            AttemptStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one attempt. Built once by the executor and never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub identifier: String,
    pub secret: String,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_length: Option<usize>,
    pub evidence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AttemptResult {
    /// Result for an attempt that got an HTTP response and was classified
    pub fn classified(
        pair: &CredentialPair,
        status: AttemptStatus,
        http_status: u16,
        final_url: String,
        body_length: usize,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            identifier: pair.identifier.clone(),
            secret: pair.secret.clone(),
            status,
            http_status: Some(http_status),
            final_url: Some(final_url),
            body_length: Some(body_length),
            evidence,
            error_message: None,
        }
    }

    /// Result for an attempt that never produced a classifiable response
    pub fn errored(pair: &CredentialPair, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            identifier: pair.identifier.clone(),
            secret: pair.secret.clone(),
            status: AttemptStatus::Error,
            http_status: None,
            final_url: None,
            body_length: None,
            evidence: vec![message.clone()],
            error_message: Some(message),
        }
    }
}

/// Progress snapshot attached to every result event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
}

impl RunProgress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            ((processed as f64 / total as f64) * 1000.0).round() / 10.0
        };

        Self {
            processed,
            total,
            percentage,
        }
    }
}

/// Anti-forgery token resolved for a login page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub field_name: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_pairs_is_index_aligned() {
        let users = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        let secrets = vec!["a1".to_string(), "b2".to_string()];

        let pairs = align_pairs(&users, &secrets);

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], CredentialPair::new("alice", "a1"));
        assert_eq!(pairs[1], CredentialPair::new("bob", "b2"));
    }

    #[test]
    fn test_progress_percentage_rounding() {
        assert_eq!(RunProgress::new(1, 3).percentage, 33.3);
        assert_eq!(RunProgress::new(2, 3).percentage, 66.7);
        assert_eq!(RunProgress::new(3, 3).percentage, 100.0);
    }

    #[test]
    fn test_status_serializes_to_wire_names() {
        let json = serde_json::to_string(&AttemptStatus::TwoFactorRequired).unwrap();
        assert_eq!(json, "\"2fa_required\"");
        assert_eq!(AttemptStatus::Failure.to_string(), "failure");
    }

    #[test]
    fn test_errored_result_carries_message() {
        let pair = CredentialPair::new("alice", "hunter2");
        let result = AttemptResult::errored(&pair, "Request timed out");

        assert_eq!(result.status, AttemptStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("Request timed out"));
        assert!(result.http_status.is_none());
        assert_eq!(pair.masked_secret(), "h***");
    }
}
