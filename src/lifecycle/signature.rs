// E-signature provider webhook events

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureEventKind {
    Signed,
    Declined,
    Viewed,
    /// Anything else the provider sends. Logged and ignored.
    Other(String),
}

impl SignatureEventKind {
    /// Accepts both bare (`signed`) and namespaced (`document.signed`) names.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim().to_ascii_lowercase();
        let bare = trimmed.strip_prefix("document.").unwrap_or(&trimmed);
        match bare {
            "signed" | "completed" => SignatureEventKind::Signed,
            "declined" | "rejected" => SignatureEventKind::Declined,
            "viewed" | "opened" => SignatureEventKind::Viewed,
            _ => SignatureEventKind::Other(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEvent {
    pub kind: SignatureEventKind,
    pub document_id: String,
    pub signer_email: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    document_id: String,
    #[serde(default)]
    signer_email: Option<String>,
    #[serde(default)]
    signed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    declined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    viewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

impl SignatureEvent {
    pub fn from_webhook(body: &str) -> Result<Self, ValidationError> {
        let payload: WebhookPayload = serde_json::from_str(body)
            .map_err(|e| ValidationError::InvalidField {
                field: "webhook",
                reason: e.to_string(),
            })?;
        if payload.data.document_id.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "data.document_id",
                reason: "must not be blank".to_string(),
            });
        }

        let kind = SignatureEventKind::parse(&payload.event);
        let data = payload.data;
        let occurred_at = match kind {
            SignatureEventKind::Signed => data.signed_at,
            SignatureEventKind::Declined => data.declined_at,
            SignatureEventKind::Viewed => data.viewed_at,
            SignatureEventKind::Other(_) => None,
        };

        Ok(Self {
            kind,
            document_id: data.document_id,
            signer_email: data.signer_email,
            occurred_at,
            reason: data.reason.filter(|r| !r.trim().is_empty()),
        })
    }

    /// Archive reason recorded when the customer declines.
    pub fn decline_reason(&self) -> String {
        match &self.reason {
            Some(reason) => format!("Declined by customer: {}", reason.trim()),
            None => "Declined by customer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_namespaced_events() {
        let event = SignatureEvent::from_webhook(
            r#"{"event":"document.declined","data":{"document_id":"doc-9","signer_email":"a@b.co","reason":"too expensive"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, SignatureEventKind::Declined);
        assert_eq!(event.document_id, "doc-9");
        assert_eq!(event.decline_reason(), "Declined by customer: too expensive");
    }

    #[test]
    fn test_unknown_events_are_kept_as_other() {
        let event = SignatureEvent::from_webhook(
            r#"{"event":"document.expired","data":{"document_id":"doc-1"}}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            SignatureEventKind::Other("document.expired".to_string())
        );
        assert_eq!(SignatureEventKind::parse("signed"), SignatureEventKind::Signed);
    }

    #[test]
    fn test_rejects_missing_document() {
        assert!(SignatureEvent::from_webhook(r#"{"event":"signed","data":{"document_id":" "}}"#).is_err());
        assert!(SignatureEvent::from_webhook("not json").is_err());
    }
}
