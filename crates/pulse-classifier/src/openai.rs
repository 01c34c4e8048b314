//! Classification over an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{ChangeKind, Severity};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::ClassifierError;
use crate::service::ClassificationService;
use crate::types::{ClassificationRequest, ClassificationResult};

/// Upper bound on diff text sent per request.
pub const MAX_DELTA_CHARS: usize = 8_000;

const SYSTEM_PROMPT: &str = "You classify changes detected on a competitor's web pages, \
app-store listings and social feeds. Reply with a JSON object with exactly these keys: \
\"kind\", \"severity\", \"summary\". Be specific about what changed.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    kind: String,
    severity: String,
    summary: String,
}

pub struct OpenAiClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    /// # Errors
    ///
    /// Returns [`ClassifierError::Client`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout_secs: u64,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ClassifierError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model,
        })
    }

    fn request_body(&self, request: &ClassificationRequest) -> serde_json::Value {
        let kinds = ChangeKind::CLASSIFIABLE
            .into_iter()
            .map(ChangeKind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let severities = Severity::ALL
            .into_iter()
            .map(Severity::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let delta: String = request.delta.chars().take(MAX_DELTA_CHARS).collect();

        json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "Subject: {}\nSource: {} ({})\n\
                         Allowed kind values: {kinds}\nAllowed severity values: {severities}\n\
                         summary: one paragraph describing the change.\n\n\
                         Diff (lines starting with '- ' were removed, '+ ' were added):\n{delta}",
                        request.subject_name, request.url, request.source_kind
                    )
                }
            ],
            "temperature": 0.1
        })
    }
}

#[async_trait]
impl ClassificationService for OpenAiClassifier {
    async fn classify_once(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(ClassifierError::transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            return Err(ClassifierError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClassifierError::Auth {
                status: status.as_u16(),
            });
        }
        if status.is_server_error() {
            return Err(ClassifierError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ClassifierError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(ClassifierError::transport)?;
        parse_chat_response(&body)
    }
}

/// Pull the verdict out of a chat-completions response body.
fn parse_chat_response(body: &str) -> Result<ClassificationResult, ClassifierError> {
    let chat: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::Malformed(format!("response envelope: {e}")))?;
    let content = chat
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ClassifierError::Malformed("no message content".to_owned()))?;
    parse_verdict(&content)
}

fn parse_verdict(content: &str) -> Result<ClassificationResult, ClassifierError> {
    let verdict: Verdict = serde_json::from_str(content)
        .map_err(|e| ClassifierError::Malformed(format!("verdict JSON: {e}")))?;

    let kind = ChangeKind::parse(&verdict.kind)
        .filter(|k| *k != ChangeKind::Unclassified)
        .ok_or_else(|| ClassifierError::Malformed(format!("unknown kind '{}'", verdict.kind)))?;
    let severity = Severity::parse(&verdict.severity).ok_or_else(|| {
        ClassifierError::Malformed(format!("unknown severity '{}'", verdict.severity))
    })?;
    let summary = verdict.summary.trim().to_owned();
    if summary.is_empty() {
        return Err(ClassifierError::Malformed("empty summary".to_owned()));
    }

    Ok(ClassificationResult {
        kind,
        severity,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::SourceKind;

    #[test]
    fn parse_verdict_accepts_valid_json() {
        let result = parse_verdict(
            r#"{"kind":"Pricing","severity":"high","summary":" Pro went from $10 to $12. "}"#,
        )
        .unwrap();
        assert_eq!(result.kind, ChangeKind::Pricing);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.summary, "Pro went from $10 to $12.");
    }

    #[test]
    fn parse_verdict_rejects_unclassified_kind() {
        let err = parse_verdict(r#"{"kind":"unclassified","severity":"low","summary":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Malformed(_)));
    }

    #[test]
    fn parse_verdict_rejects_unknown_severity() {
        let err =
            parse_verdict(r#"{"kind":"ui","severity":"critical","summary":"x"}"#).unwrap_err();
        assert!(matches!(err, ClassifierError::Malformed(ref m) if m.contains("critical")));
    }

    #[test]
    fn parse_verdict_rejects_missing_keys() {
        let err = parse_verdict(r#"{"kind":"ui"}"#).unwrap_err();
        assert!(matches!(err, ClassifierError::Malformed(_)));
    }

    #[test]
    fn parse_chat_response_requires_content() {
        let err = parse_chat_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ClassifierError::Malformed(_)));
    }

    #[test]
    fn request_body_bounds_delta_and_lists_allowed_values() {
        let classifier =
            OpenAiClassifier::new("http://localhost/v1/", "k".to_owned(), "m".to_owned(), 5)
                .unwrap();
        let request = ClassificationRequest {
            subject_name: "Acme".to_owned(),
            url: "https://acme.com/pricing".to_owned(),
            source_kind: SourceKind::Website,
            delta: "x".repeat(MAX_DELTA_CHARS + 500),
        };
        let body = classifier.request_body(&request);
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("feature, pricing, ui, other"));
        assert!(user.contains("high, medium, low"));
        assert!(!user.contains(&"x".repeat(MAX_DELTA_CHARS + 1)));
        assert_eq!(body["model"], "m");
        assert_eq!(classifier.base_url, "http://localhost/v1");
    }
}
