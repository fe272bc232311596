//! Branch names and commit messages.

use crate::workflow::types::Classification;

const MAX_SLUG_WORDS: usize = 6;
const FALLBACK_SLUG: &str = "ticket";

/// Trailer that ties a commit back to the run that made it.
pub const RUN_TRAILER: &str = "Hyphae-Run";

/// Lowercase ASCII words of `title`, joined by single hyphens.
pub fn slugify(title: &str) -> String {
    let words: Vec<String> = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(MAX_SLUG_WORDS)
        .map(str::to_ascii_lowercase)
        .collect();

    if words.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        words.join("-")
    }
}

/// `<prefix>-<ticket>-<run_id>-<slug>`
pub fn branch_name(
    classification: Classification,
    ticket_number: u64,
    run_id: &str,
    title: &str,
) -> String {
    format!(
        "{}-{ticket_number}-{run_id}-{}",
        classification.branch_prefix(),
        slugify(title)
    )
}

/// `<type>: <title> for #<ticket>`, also used as the pull request title.
pub fn commit_subject(classification: Classification, ticket_number: u64, title: &str) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    format!(
        "{}: {title} for #{ticket_number}",
        classification.commit_type()
    )
}

pub fn commit_message(
    classification: Classification,
    ticket_number: u64,
    title: &str,
    run_id: &str,
) -> String {
    format!(
        "{}\n\n{RUN_TRAILER}: {run_id}\n",
        commit_subject(classification, ticket_number, title)
    )
}

/// Whether `message` has a `Hyphae-Run: <run_id>` trailer line.
pub fn has_run_trailer(message: &str, run_id: &str) -> bool {
    message.lines().any(|line| {
        line.split_once(':')
            .is_some_and(|(key, value)| key.trim() == RUN_TRAILER && value.trim() == run_id)
    })
}
