//! Represents a targeted content item ("snippet") and its targeting rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Content kind: rich snippets carry a template reference and render to
/// markup; JSON snippets are delivered verbatim as structured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SnippetKind {
    Rich,
    Json,
}

/// A per-field regex constraint on the requesting client.
///
/// The pattern is applied with search semantics (`Regex::is_match`), not a
/// full-string match. A rule naming an unknown field, or carrying a pattern
/// that fails to compile, excludes the snippet (fail-closed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MatchRule {
    pub field: String,
    pub pattern: String,
}

/// A single content item with its targeting attributes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Snippet {
    pub id: i64,
    pub name: String,
    pub kind: SnippetKind,
    pub disabled: bool,

    /// Selection weight in [1, 100], delivered to JSON clients for their
    /// own random draw. Not used for rich snippets.
    pub weight: i64,
    pub priority: i64,

    pub publish_start: Option<DateTime<Utc>>,
    pub publish_end: Option<DateTime<Utc>>,

    pub on_release: i64,
    pub on_beta: i64,
    pub on_aurora: i64,
    pub on_nightly: i64,

    pub on_startpage_1: bool,
    pub on_startpage_2: bool,
    pub on_startpage_3: bool,
    pub on_startpage_4: bool,
    pub on_startpage_5: bool,

    pub exclude_from_search: bool,

    pub template_id: Option<i64>,
    /// Template data payload, stored as a JSON object string.
    pub data: String,

    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Locale codes this snippet targets; empty means all locales.
    #[sqlx(skip)]
    pub locales: Vec<String>,

    /// Per-field regex constraints; absence of a rule leaves the field
    /// unconstrained.
    #[sqlx(skip)]
    pub match_rules: Vec<MatchRule>,
}

impl Snippet {
    /// Multi-value flag for a channel name, or `None` for unknown channels.
    pub fn channel_flag(&self, channel: &str) -> Option<i64> {
        match channel {
            "release" => Some(self.on_release),
            "beta" => Some(self.on_beta),
            "aurora" => Some(self.on_aurora),
            "nightly" => Some(self.on_nightly),
            _ => None,
        }
    }

    /// Whether this snippet targets the given startpage version.
    pub fn startpage_flag(&self, version: &str) -> bool {
        match version {
            "1" => self.on_startpage_1,
            "2" => self.on_startpage_2,
            "3" => self.on_startpage_3,
            "4" => self.on_startpage_4,
            "5" => self.on_startpage_5,
            _ => false,
        }
    }

    /// Serialized form for JSON delivery: the data payload merged with the
    /// identifying fields. Unparseable payloads degrade to an empty object.
    pub fn to_json_value(&self) -> serde_json::Value {
        let mut map = match serde_json::from_str::<serde_json::Value>(&self.data) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("id".into(), self.id.into());
        map.insert("name".into(), self.name.clone().into());
        map.insert("weight".into(), self.weight.into());
        serde_json::Value::Object(map)
    }
}
