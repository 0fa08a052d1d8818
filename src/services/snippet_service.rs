//! SnippetService — the content repository. Owns all persistence for
//! snippets, templates, and their associations; callers (matching engine,
//! bundle manager, handlers) never touch SQL themselves.

use crate::models::snippet::{MatchRule, Snippet, SnippetKind};
use crate::models::template::{Template, TemplateVariable};
use crate::pagination::Page;
use crate::render;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{collections::HashMap, io, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnippetError {
    #[error("snippet {0} not found")]
    SnippetNotFound(i64),
    #[error("template {0} not found")]
    TemplateNotFound(i64),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("bundle unavailable: {0}")]
    BundleUnavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SnippetResult<T> = Result<T, SnippetError>;

const SNIPPET_COLUMNS: &str = "id, name, kind, disabled, weight, priority, \
    publish_start, publish_end, on_release, on_beta, on_aurora, on_nightly, \
    on_startpage_1, on_startpage_2, on_startpage_3, on_startpage_4, on_startpage_5, \
    exclude_from_search, template_id, data, is_deleted, created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, name, code, created_at, updated_at";

/// Attributes for a new snippet. Defaults mirror the storage defaults:
/// enabled, weight 100, targeting startpage 4, visible nowhere until a
/// channel flag is raised.
#[derive(Debug, Clone)]
pub struct NewSnippet {
    pub name: String,
    pub kind: SnippetKind,
    pub disabled: bool,
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
    pub data: String,
    pub locales: Vec<String>,
    pub match_rules: Vec<MatchRule>,
}

impl Default for NewSnippet {
    fn default() -> Self {
        Self {
            name: "snippet".into(),
            kind: SnippetKind::Rich,
            disabled: false,
            weight: 100,
            priority: 0,
            publish_start: None,
            publish_end: None,
            on_release: 0,
            on_beta: 0,
            on_aurora: 0,
            on_nightly: 0,
            on_startpage_1: false,
            on_startpage_2: false,
            on_startpage_3: false,
            on_startpage_4: true,
            on_startpage_5: false,
            exclude_from_search: false,
            template_id: None,
            data: "{}".into(),
            locales: Vec::new(),
            match_rules: Vec::new(),
        }
    }
}

/// Summary row for the active-snippets listing.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActiveSnippet {
    pub id: i64,
    pub name: String,
    pub kind: SnippetKind,
}

#[derive(FromRow)]
struct LocaleRow {
    snippet_id: i64,
    locale: String,
}

#[derive(FromRow)]
struct RuleRow {
    snippet_id: i64,
    field: String,
    pattern: String,
}

/// Map a channel name to its flag column, for index filters. Unknown
/// channels are rejected so the name never reaches SQL.
pub fn channel_column(channel: &str) -> Option<&'static str> {
    match channel {
        "release" => Some("on_release"),
        "beta" => Some("on_beta"),
        "aurora" => Some("on_aurora"),
        "nightly" => Some("on_nightly"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct SnippetService {
    pub db: Arc<SqlitePool>,
}

impl SnippetService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a snippet with its locales and match rules.
    pub async fn create_snippet(&self, new: NewSnippet) -> SnippetResult<Snippet> {
        if !(1..=100).contains(&new.weight) {
            return Err(SnippetError::InvalidPayload(format!(
                "weight must be in [1, 100], got {}",
                new.weight
            )));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let mut snippet = sqlx::query_as::<_, Snippet>(&format!(
            "INSERT INTO snippets (name, kind, disabled, weight, priority, \
             publish_start, publish_end, on_release, on_beta, on_aurora, on_nightly, \
             on_startpage_1, on_startpage_2, on_startpage_3, on_startpage_4, on_startpage_5, \
             exclude_from_search, template_id, data, is_deleted, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?) \
             RETURNING {SNIPPET_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(new.kind)
        .bind(new.disabled)
        .bind(new.weight)
        .bind(new.priority)
        .bind(new.publish_start)
        .bind(new.publish_end)
        .bind(new.on_release)
        .bind(new.on_beta)
        .bind(new.on_aurora)
        .bind(new.on_nightly)
        .bind(new.on_startpage_1)
        .bind(new.on_startpage_2)
        .bind(new.on_startpage_3)
        .bind(new.on_startpage_4)
        .bind(new.on_startpage_5)
        .bind(new.exclude_from_search)
        .bind(new.template_id)
        .bind(&new.data)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for locale in &new.locales {
            sqlx::query("INSERT OR IGNORE INTO snippet_locales (snippet_id, locale) VALUES (?, ?)")
                .bind(snippet.id)
                .bind(locale.to_lowercase())
                .execute(&mut *tx)
                .await?;
        }
        for rule in &new.match_rules {
            sqlx::query(
                "INSERT INTO snippet_match_rules (snippet_id, field, pattern) VALUES (?, ?, ?)",
            )
            .bind(snippet.id)
            .bind(&rule.field)
            .bind(&rule.pattern)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        snippet.locales = new.locales.iter().map(|l| l.to_lowercase()).collect();
        snippet.match_rules = new.match_rules;
        Ok(snippet)
    }

    /// Fetch one snippet by id with associations attached. Soft-deleted
    /// rows are treated as missing.
    pub async fn get_snippet(&self, id: i64) -> SnippetResult<Snippet> {
        let snippet = sqlx::query_as::<_, Snippet>(&format!(
            "SELECT {SNIPPET_COLUMNS} FROM snippets WHERE id = ? AND is_deleted = 0"
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => SnippetError::SnippetNotFound(id),
            other => SnippetError::Sqlx(other),
        })?;

        let mut snippets = vec![snippet];
        self.attach_associations(&mut snippets).await?;
        Ok(snippets.remove(0))
    }

    /// Candidate snippets of a kind for the matching engine: not deleted,
    /// with locales and match rules attached, in insertion order.
    pub async fn fetch_candidates(&self, kind: SnippetKind) -> SnippetResult<Vec<Snippet>> {
        let mut snippets = sqlx::query_as::<_, Snippet>(&format!(
            "SELECT {SNIPPET_COLUMNS} FROM snippets \
             WHERE kind = ? AND is_deleted = 0 ORDER BY id ASC"
        ))
        .bind(kind)
        .fetch_all(&*self.db)
        .await?;

        self.attach_associations(&mut snippets).await?;
        Ok(snippets)
    }

    /// Count snippets of a kind, honoring an optional channel-flag equality
    /// filter. Used to resolve index pagination before fetching a page.
    pub async fn count_filtered(
        &self,
        kind: SnippetKind,
        channel_filter: Option<(&str, i64)>,
    ) -> SnippetResult<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM snippets WHERE is_deleted = 0 AND kind = ",
        );
        builder.push_bind(kind);
        push_channel_filter(&mut builder, channel_filter);
        let count: i64 = builder.build_query_scalar().fetch_one(&*self.db).await?;
        Ok(count as usize)
    }

    /// One page of the index listing, newest first.
    pub async fn list_snippets(
        &self,
        kind: SnippetKind,
        channel_filter: Option<(&str, i64)>,
        page: &Page,
    ) -> SnippetResult<Vec<Snippet>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SNIPPET_COLUMNS} FROM snippets WHERE is_deleted = 0 AND kind = "
        ));
        builder.push_bind(kind);
        push_channel_filter(&mut builder, channel_filter);
        builder.push(" ORDER BY id DESC LIMIT ");
        builder.push_bind(page.per_page as i64);
        builder.push(" OFFSET ");
        builder.push_bind(page.offset() as i64);

        let snippets = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(snippets)
    }

    /// Number of live snippet rows. Healthz treats a deployment with no
    /// undeleted content as broken.
    pub async fn count_snippets(&self) -> SnippetResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM snippets WHERE is_deleted = 0")
                .fetch_one(&*self.db)
                .await?;
        Ok(count)
    }

    /// Most recent content change, for bundle staleness checks. Template
    /// edits count: they change rendered output without touching any
    /// snippet row.
    pub async fn latest_update(&self) -> SnippetResult<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(ts) FROM ( \
                 SELECT MAX(updated_at) AS ts FROM snippets WHERE is_deleted = 0 \
                 UNION ALL \
                 SELECT MAX(updated_at) FROM templates \
             )",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(latest)
    }

    /// Replace a snippet's data payload, bumping its updated timestamp.
    pub async fn update_snippet_data(&self, id: i64, data: &str) -> SnippetResult<()> {
        let result = sqlx::query(
            "UPDATE snippets SET data = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(data)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SnippetError::SnippetNotFound(id));
        }
        Ok(())
    }

    /// All enabled snippets of both kinds, id and name only.
    pub async fn active_snippets(&self) -> SnippetResult<Vec<ActiveSnippet>> {
        let rows = sqlx::query_as::<_, ActiveSnippet>(
            "SELECT id, name, kind FROM snippets \
             WHERE disabled = 0 AND is_deleted = 0 ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get_template(&self, id: i64) -> SnippetResult<Template> {
        sqlx::query_as::<_, Template>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => SnippetError::TemplateNotFound(id),
            other => SnippetError::Sqlx(other),
        })
    }

    /// Create or update a template and synchronize its variable records
    /// with the placeholders referenced by the code.
    ///
    /// Synchronization is idempotent: missing variables are inserted, stale
    /// ones removed, reserved names never materialized, and existing records
    /// (with any hand-edited type or description) are left untouched.
    pub async fn save_template(
        &self,
        id: Option<i64>,
        name: &str,
        code: &str,
    ) -> SnippetResult<Template> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let template = match id {
            Some(id) => sqlx::query_as::<_, Template>(&format!(
                "UPDATE templates SET name = ?, code = ?, updated_at = ? WHERE id = ? \
                 RETURNING {TEMPLATE_COLUMNS}"
            ))
            .bind(name)
            .bind(code)
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => SnippetError::TemplateNotFound(id),
                other => SnippetError::Sqlx(other),
            })?,
            None => {
                sqlx::query_as::<_, Template>(&format!(
                    "INSERT INTO templates (name, code, created_at, updated_at) \
                     VALUES (?, ?, ?, ?) RETURNING {TEMPLATE_COLUMNS}"
                ))
                .bind(name)
                .bind(code)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let variables = render::extract_variables(code);

        if variables.is_empty() {
            sqlx::query("DELETE FROM template_variables WHERE template_id = ?")
                .bind(template.id)
                .execute(&mut *tx)
                .await?;
        } else {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "DELETE FROM template_variables WHERE template_id = ",
            );
            builder.push_bind(template.id);
            builder.push(" AND name NOT IN (");
            let mut separated = builder.separated(", ");
            for variable in &variables {
                separated.push_bind(variable);
            }
            builder.push(")");
            builder.build().execute(&mut *tx).await?;
        }

        for variable in &variables {
            sqlx::query(
                "INSERT OR IGNORE INTO template_variables (template_id, name) VALUES (?, ?)",
            )
            .bind(template.id)
            .bind(variable)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(template)
    }

    pub async fn template_variables(
        &self,
        template_id: i64,
    ) -> SnippetResult<Vec<TemplateVariable>> {
        let rows = sqlx::query_as::<_, TemplateVariable>(
            "SELECT template_id, name, var_type, description FROM template_variables \
             WHERE template_id = ? ORDER BY name ASC",
        )
        .bind(template_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Load locales and match rules for a batch of snippets with two
    /// grouped queries.
    async fn attach_associations(&self, snippets: &mut [Snippet]) -> SnippetResult<()> {
        if snippets.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = snippets.iter().map(|s| s.id).collect();

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT snippet_id, locale FROM snippet_locales WHERE snippet_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(id);
        }
        builder.push(") ORDER BY locale ASC");
        let locale_rows: Vec<LocaleRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT snippet_id, field, pattern FROM snippet_match_rules WHERE snippet_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(id);
        }
        builder.push(")");
        let rule_rows: Vec<RuleRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut locales: HashMap<i64, Vec<String>> = HashMap::new();
        for row in locale_rows {
            locales.entry(row.snippet_id).or_default().push(row.locale);
        }
        let mut rules: HashMap<i64, Vec<MatchRule>> = HashMap::new();
        for row in rule_rows {
            rules.entry(row.snippet_id).or_default().push(MatchRule {
                field: row.field,
                pattern: row.pattern,
            });
        }

        for snippet in snippets.iter_mut() {
            snippet.locales = locales.remove(&snippet.id).unwrap_or_default();
            snippet.match_rules = rules.remove(&snippet.id).unwrap_or_default();
        }
        Ok(())
    }
}

fn push_channel_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    channel_filter: Option<(&str, i64)>,
) {
    if let Some((channel, value)) = channel_filter {
        if let Some(column) = channel_column(channel) {
            builder.push(format!(" AND {column} = "));
            builder.push_bind(value);
        }
    }
}
