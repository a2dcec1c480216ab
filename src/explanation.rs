//! Request handed to an external [`ExplanationGenerator`](crate::traits::ExplanationGenerator).
//!
//! The crate never calls a generator itself. It only guarantees that every
//! request it builds is non-empty and carries no `"unknown"` labels.

use std::fmt::Write as _;

use serde::Serialize;

use crate::errors::{Result, ScanError};
use crate::result::Scored;

/// Number of top findings forwarded to the generator.
pub const EXPLANATION_TOP_N: usize = 3;
/// Number of most recent conversation turns kept for follow-up chat.
pub const MAX_HISTORY_TURNS: usize = 10;

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A finding as the generator sees it. Regions are not forwarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainedFinding {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationRequest {
    findings: Vec<ExplainedFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    history: Vec<ChatTurn>,
}

impl ExplanationRequest {
    /// Builds a request from ranked results, keeping the first
    /// [`EXPLANATION_TOP_N`].
    ///
    /// Fails with [`ScanError::Validation`] when `results` is empty or any
    /// forwarded label is blank or `"unknown"`. Blank context counts as absent.
    pub fn new<T: Scored>(results: &[T], user_context: Option<&str>) -> Result<Self> {
        if results.is_empty() {
            return Err(ScanError::Validation {
                field: "findings".to_string(),
                reason: "must contain at least one result".to_string(),
            });
        }

        let findings = results
            .iter()
            .take(EXPLANATION_TOP_N)
            .map(|r| {
                let label = r.label().trim();
                if label.is_empty() || label.eq_ignore_ascii_case(UNKNOWN_LABEL) {
                    return Err(ScanError::Validation {
                        field: "label".to_string(),
                        reason: format!("{:?} is not a valid condition label", r.label()),
                    });
                }
                Ok(ExplainedFinding {
                    label: label.to_string(),
                    confidence: r.confidence(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let user_context = user_context
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(Self {
            findings,
            user_context,
            history: Vec::new(),
        })
    }

    /// Attaches conversation history, oldest first. Only the last
    /// [`MAX_HISTORY_TURNS`] turns are kept.
    pub fn with_history(mut self, history: impl IntoIterator<Item = ChatTurn>) -> Self {
        let mut turns: Vec<_> = history.into_iter().collect();
        let excess = turns.len().saturating_sub(MAX_HISTORY_TURNS);
        turns.drain(..excess);
        self.history = turns;
        self
    }

    pub fn findings(&self) -> &[ExplainedFinding] {
        &self.findings
    }

    pub fn primary(&self) -> &ExplainedFinding {
        // construction rejects empty result sets
        &self.findings[0]
    }

    pub fn user_context(&self) -> Option<&str> {
        self.user_context.as_deref()
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Renders the instruction text for the generator.
    pub fn prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a medical AI assistant. A skin condition model analyzed an image \
             and identified the following potential conditions (ranked by confidence):\n\n",
        );
        for (i, finding) in self.findings.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "{}. {} ({}% confidence)",
                i + 1,
                finding.label,
                finding.confidence
            );
        }

        let primary = self.primary();
        let _ = write!(
            prompt,
            "\nThe model's primary prediction is {} ({}% confidence), \
             but other conditions are also possible.",
            primary.label, primary.confidence
        );

        if let Some(context) = &self.user_context {
            let _ = write!(
                prompt,
                "\n\nUser's description:\n\"{context}\"\n\n\
                 Your explanation MUST explicitly reference this description and \
                 relate it to each condition listed above."
            );
        }

        prompt.push_str(
            "\n\nProvide a concise explanation covering each listed condition, \
             how they differ, care recommendations, and when to seek professional \
             medical care. This is informational only, not medical advice.",
        );
        prompt
    }
}
