//! The matching engine: evaluates snippet targeting rules against a client.
//!
//! Pure over its inputs (request time is passed in). Every predicate must
//! hold for a snippet to match; there is no partial-match ranking. Malformed
//! regex rules exclude the snippet they belong to and are logged, never
//! surfaced as a request error.

use crate::models::client::ClientDescriptor;
use crate::models::snippet::Snippet;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

/// Return the snippets applicable to `client`, ordered by priority
/// descending with insertion order preserved for ties.
pub fn match_snippets(
    candidates: Vec<Snippet>,
    client: &ClientDescriptor,
    now: DateTime<Utc>,
    include_disabled: bool,
) -> Vec<Snippet> {
    let mut matched: Vec<Snippet> = candidates
        .into_iter()
        .filter(|snippet| matches_client(snippet, client, now, include_disabled))
        .collect();
    // Stable sort keeps insertion order within a priority.
    matched.sort_by(|a, b| b.priority.cmp(&a.priority));
    matched
}

/// Layer an equality filter on a stored multi-value channel flag, e.g.
/// `on_nightly=2` keeps only items whose nightly flag is exactly 2.
pub fn filter_channel_eq(snippets: Vec<Snippet>, channel: &str, value: i64) -> Vec<Snippet> {
    snippets
        .into_iter()
        .filter(|snippet| snippet.channel_flag(channel) == Some(value))
        .collect()
}

fn matches_client(
    snippet: &Snippet,
    client: &ClientDescriptor,
    now: DateTime<Utc>,
    include_disabled: bool,
) -> bool {
    if snippet.disabled && !include_disabled {
        return false;
    }

    match snippet.channel_flag(&client.channel) {
        Some(flag) if flag != 0 => {}
        _ => return false,
    }

    if !snippet.startpage_flag(&client.startpage_version) {
        return false;
    }

    if !snippet.locales.is_empty() {
        let locale = client.locale.to_lowercase();
        if !snippet.locales.iter().any(|l| l.to_lowercase() == locale) {
            return false;
        }
    }

    for rule in &snippet.match_rules {
        if !rule_matches(snippet.id, &rule.field, &rule.pattern, client) {
            return false;
        }
    }

    within_publish_window(snippet, now)
}

/// Regex search of a client field. Unknown fields and uncompilable patterns
/// fail closed.
fn rule_matches(snippet_id: i64, field: &str, pattern: &str, client: &ClientDescriptor) -> bool {
    let Some(value) = client.field(field) else {
        warn!(snippet_id, field, "match rule references unknown client field");
        return false;
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(value),
        Err(err) => {
            warn!(snippet_id, field, pattern, %err, "malformed match rule pattern");
            false
        }
    }
}

fn within_publish_window(snippet: &Snippet, now: DateTime<Utc>) -> bool {
    if let Some(start) = snippet.publish_start {
        if now < start {
            return false;
        }
    }
    if let Some(end) = snippet.publish_end {
        if now >= end {
            return false;
        }
    }
    true
}
