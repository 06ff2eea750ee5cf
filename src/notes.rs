//! Note service client.
//!
//! Sends sanitized page text to the remote summarizer and returns the
//! markdown notes it produces. The service contract:
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `POST` | `/api/summarize` | [`NoteRequest`] | [`NoteResponse`] |
//! | `GET`  | `/health` | none | [`HealthStatus`] |
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors (including timeouts) → retry
//! - backoff: 1s, 2s, 4s, ... capped at 2^5 seconds
//!
//! A response with `success: false` is not retried; the service already
//! reported why it could not produce notes.

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::NotesConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteRequest {
    pub text: String,
    #[serde(rename = "pdf_name")]
    pub document_name: String,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NoteResponse {
    #[serde(default)]
    pub summary: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl NoteResponse {
    /// The note to store, if the service produced one.
    pub fn into_note(self) -> Result<String> {
        match (self.success, self.summary) {
            (true, Some(summary)) if !summary.trim().is_empty() => Ok(summary),
            (true, _) => bail!("note service returned an empty summary"),
            (false, _) => bail!(
                "note service reported failure: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[async_trait]
pub trait NoteService: Send + Sync {
    async fn summarize(&self, request: &NoteRequest) -> Result<NoteResponse>;
}

/// Backoff before retry number `attempt` (1-based).
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// [`NoteService`] over HTTP with timeout and retry.
pub struct HttpNoteService {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl HttpNoteService {
    pub fn new(config: &NotesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("note service health check failed {}: {}", status, body_text);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl NoteService for HttpNoteService {
    async fn summarize(&self, request: &NoteRequest) -> Result<NoteResponse> {
        let url = format!("{}/api/summarize", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt)).await;
            }

            let resp = self.client.post(&url).json(request).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json::<NoteResponse>().await?);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::debug!(attempt, %status, "note service error, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "note service error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("note service error {}: {}", status, body_text);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "note service unreachable, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("note request failed after retries")))
    }
}

/// A concept named in a note, with the line it appeared on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptMention {
    pub name: String,
    pub description: Option<String>,
    pub context: String,
}

static BOLD_TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+?)\*\*").unwrap());

/// Pull concept names out of the `## Key Concepts` section of a note.
///
/// Each bullet contributes its first bold term, or else the text before a
/// colon. Text after the term and a `:` or `-` separator becomes the
/// description. Names are deduplicated case-insensitively.
pub fn extract_concepts(markdown: &str) -> Vec<ConceptMention> {
    let mut mentions: Vec<ConceptMention> = Vec::new();
    let mut in_section = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            in_section = heading.trim().eq_ignore_ascii_case("key concepts");
            continue;
        }
        if trimmed.starts_with('#') && !trimmed.starts_with("###") {
            in_section = false;
            continue;
        }
        if !in_section {
            continue;
        }

        let bullet = match trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| trimmed.strip_prefix("+ "))
        {
            Some(rest) => rest.trim(),
            None => continue,
        };

        let (name, rest) = if let Some(caps) = BOLD_TERM.captures(bullet) {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (caps[1].trim().to_string(), &bullet[whole..])
        } else if let Some((before, after)) = bullet.split_once(':') {
            (before.trim().to_string(), after)
        } else {
            continue;
        };

        let name = name.trim_end_matches(':').trim().to_string();
        if name.is_empty() || name.len() > 120 {
            continue;
        }
        if mentions
            .iter()
            .any(|m| m.name.eq_ignore_ascii_case(&name))
        {
            continue;
        }

        let description = rest
            .trim_start_matches(|c: char| c == ':' || c == '-' || c == '–' || c.is_whitespace())
            .trim();

        mentions.push(ConceptMention {
            name,
            description: (!description.is_empty()).then(|| description.to_string()),
            context: bullet.to_string(),
        });
    }

    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(10), Duration::from_secs(32));
    }

    #[test]
    fn test_request_wire_names() {
        let req = NoteRequest {
            text: "Neural networks are...".to_string(),
            document_name: "deep_learning.pdf".to_string(),
            page_number: 42,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "Neural networks are...",
                "pdf_name": "deep_learning.pdf",
                "page_number": 42
            })
        );
    }

    #[test]
    fn test_response_success() {
        let resp: NoteResponse = serde_json::from_str(
            r###"{"summary": "## Key Concepts\n\n- Neural networks", "success": true, "error": null}"###,
        )
        .unwrap();
        assert_eq!(
            resp.into_note().unwrap(),
            "## Key Concepts\n\n- Neural networks"
        );
    }

    #[test]
    fn test_response_failure() {
        let resp: NoteResponse = serde_json::from_str(
            r#"{"summary": null, "success": false, "error": "AI model returned empty response"}"#,
        )
        .unwrap();
        let err = resp.into_note().unwrap_err();
        assert!(err.to_string().contains("AI model returned empty response"));
    }

    #[test]
    fn test_response_success_without_summary() {
        let resp: NoteResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(resp.into_note().is_err());
    }

    #[test]
    fn test_extract_concepts_from_key_concepts_section() {
        let note = "## Key Concepts\n\n\
            - **Entropy**: a measure of uncertainty\n\
            - **Mutual information** - shared information between variables\n\
            - Channel capacity: maximum rate of reliable transmission\n\
            - just a remark without a term\n\
            - **entropy** again\n\n\
            ## Derivation\n\n\
            - **Not a concept**: outside the section\n";

        let concepts = extract_concepts(note);
        let names: Vec<&str> = concepts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Entropy", "Mutual information", "Channel capacity"]);
        assert_eq!(
            concepts[0].description.as_deref(),
            Some("a measure of uncertainty")
        );
        assert_eq!(
            concepts[1].description.as_deref(),
            Some("shared information between variables")
        );
        assert_eq!(concepts[0].context, "**Entropy**: a measure of uncertainty");
    }

    #[test]
    fn test_extract_concepts_without_section() {
        assert!(extract_concepts("# Title\n\n- **Term**: text").is_empty());
        assert!(extract_concepts("").is_empty());
    }
}
