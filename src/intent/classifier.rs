//! Intent classifier: keyword rules first, the oracle only when none match.
//!
//! Never fails. Oracle trouble of any kind collapses to "no category" with
//! an apology.

use super::category::{normalize, Category, RuleSet};
use super::oracle::{Oracle, OracleError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Token the oracle is asked to emit before a category name.
pub const MARKER: &str = "LOCATION_SEARCH:";

pub const APOLOGY_REPLY: &str = "Maaf, terjadi kesalahan. Silakan coba lagi.";
pub const NOT_UNDERSTOOD_REPLY: &str = "Maaf, saya kurang mengerti. Bisa dijelaskan lagi?";

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Enforced around the whole oracle call, failover included.
    pub oracle_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(15),
        }
    }
}

/// What decided the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassificationOrigin {
    Rule,
    Oracle,
    /// Oracle skipped or failed.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    /// `None` when no location intent was detected.
    pub category: Option<Category>,
    /// Never empty, never contains the marker.
    pub reply_text: String,
    pub origin: ClassificationOrigin,
}

impl ClassificationResult {
    fn found(category: Category, origin: ClassificationOrigin) -> Self {
        Self {
            category: Some(category),
            reply_text: category.canned_reply(),
            origin,
        }
    }

    fn conversational(reply_text: String, origin: ClassificationOrigin) -> Self {
        Self {
            category: None,
            reply_text,
            origin,
        }
    }
}

/// A marker found in an oracle reply.
#[derive(Debug, PartialEq)]
pub struct MarkerMatch<'a> {
    /// Raw category name after the marker.
    pub name: &'a str,
    /// The reply with the marker and name removed.
    pub stripped: String,
}

/// Find the first marker in `reply`. The name runs to end-of-line, a double
/// quote or a closing bracket.
pub fn extract_marker(reply: &str) -> Option<MarkerMatch<'_>> {
    let start = reply.find(MARKER)?;
    let after = &reply[start + MARKER.len()..];
    let end = after.find(['\n', '"', ']']).unwrap_or(after.len());

    let name = after[..end].trim().trim_start_matches('[').trim();
    let rest = after[end..].strip_prefix(']').unwrap_or(&after[end..]);

    let stripped = format!("{} {}", reply[..start].trim_end(), rest.trim_start());
    let stripped = stripped.trim().trim_matches('"').trim().to_string();
    Some(MarkerMatch { name, stripped })
}

/// Remove every remaining marker and the name that follows it.
fn strip_markers(mut text: String) -> String {
    while let Some(m) = extract_marker(&text) {
        text = m.stripped;
    }
    text
}

/// The prompt sent to the oracle for unmatched text.
pub fn build_prompt(user_text: &str) -> String {
    let names: Vec<&str> = Category::ALL.iter().map(|c| c.marker_name()).collect();
    format!(
        "Analyze: \"{}\". If location search, respond: \"Saya akan carikan [tempat] untuk Anda. {}[type]\" \
         where [type] is one of: {}. If not, respond helpfully in Bahasa Indonesia.",
        user_text.replace('"', "'"),
        MARKER,
        names.join(", "),
    )
}

pub struct IntentClassifier {
    rules: RuleSet,
    oracle: Arc<dyn Oracle>,
    config: ClassifierConfig,
}

impl IntentClassifier {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            rules: RuleSet::default(),
            oracle,
            config: ClassifierConfig::default(),
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_config(mut self, config: ClassifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub async fn classify(&self, user_text: &str) -> ClassificationResult {
        let normalized = normalize(user_text);
        if normalized.is_empty() {
            return ClassificationResult::conversational(
                NOT_UNDERSTOOD_REPLY.into(),
                ClassificationOrigin::Fallback,
            );
        }

        if let Some(category) = self.rules.first_match(&normalized) {
            debug!(%category, "intent matched by rule");
            return ClassificationResult::found(category, ClassificationOrigin::Rule);
        }

        let prompt = build_prompt(user_text.trim());
        let outcome = tokio::time::timeout(self.config.oracle_timeout, self.oracle.complete(&prompt))
            .await
            .unwrap_or(Err(OracleError::Timeout));

        let result = match outcome {
            Ok(reply) => interpret_reply(&reply),
            Err(e) => {
                warn!(error = %e, "oracle call failed");
                ClassificationResult::conversational(APOLOGY_REPLY.into(), ClassificationOrigin::Fallback)
            }
        };
        info!(category = ?result.category, origin = ?result.origin, "intent classified");
        result
    }
}

fn interpret_reply(reply: &str) -> ClassificationResult {
    let Some(marker) = extract_marker(reply) else {
        let text = reply.trim();
        let text = if text.is_empty() { NOT_UNDERSTOOD_REPLY } else { text };
        return ClassificationResult::conversational(text.into(), ClassificationOrigin::Oracle);
    };

    match Category::from_marker(marker.name) {
        Some(category) => ClassificationResult::found(category, ClassificationOrigin::Oracle),
        None => {
            warn!(name = marker.name, "oracle named an unknown category");
            let text = strip_markers(marker.stripped);
            let text = if text.is_empty() {
                NOT_UNDERSTOOD_REPLY.to_string()
            } else {
                text
            };
            ClassificationResult::conversational(text, ClassificationOrigin::Oracle)
        }
    }
}
