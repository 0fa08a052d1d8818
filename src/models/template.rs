//! Represents a rendering template and its declared variables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A markup template with named placeholders.
///
/// The set of `template_variables` rows for a template is derived from its
/// code on save: every non-reserved placeholder gets a variable record, and
/// records for placeholders no longer present are removed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A declared placeholder of a template.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateVariable {
    pub template_id: i64,
    pub name: String,
    pub var_type: String,
    pub description: String,
}
