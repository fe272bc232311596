use std::collections::BTreeSet;

use crate::error::{AppError, Result};
use crate::workflow::types::Classification;

/// Read the classification out of the agent's reply.
///
/// Exactly one distinct keyword must appear as a whole word, with or without
/// a leading `/`. Repeating the same keyword is fine; naming two is not.
pub fn parse_classification(text: &str) -> Result<Classification> {
    let found: BTreeSet<&'static str> = text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .filter_map(|word| match word.to_ascii_lowercase().as_str() {
            "feature" => Some("feature"),
            "bug" => Some("bug"),
            "chore" => Some("chore"),
            _ => None,
        })
        .collect();

    let mut found = found.into_iter();
    match (found.next(), found.next()) {
        (Some(keyword), None) => Ok(match keyword {
            "feature" => Classification::Feature,
            "bug" => Classification::Bug,
            _ => Classification::Chore,
        }),
        (None, _) => Err(AppError::Classification(format!(
            "No classification keyword in agent reply: {:?}",
            truncate(text)
        ))),
        (Some(_), Some(_)) => Err(AppError::Classification(format!(
            "Ambiguous classification in agent reply: {:?}",
            truncate(text)
        ))),
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
