//! Admin-facing index listings with clamped pagination.

use crate::errors::AppError;
use crate::handlers::fetch_handlers::ChannelFilterQuery;
use crate::models::snippet::{Snippet, SnippetKind};
use crate::pagination::{self, Page};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    pub page: Option<String>,
    pub on_release: Option<String>,
    pub on_beta: Option<String>,
    pub on_aurora: Option<String>,
    pub on_nightly: Option<String>,
}

impl IndexQuery {
    fn channel_filter(&self) -> Option<(&'static str, i64)> {
        ChannelFilterQuery {
            on_release: self.on_release.clone(),
            on_beta: self.on_beta.clone(),
            on_aurora: self.on_aurora.clone(),
            on_nightly: self.on_nightly.clone(),
        }
        .channel_filter()
    }
}

/// One row of a listing page.
#[derive(Debug, Serialize)]
pub struct SnippetSummary {
    pub id: i64,
    pub name: String,
    pub kind: SnippetKind,
    pub disabled: bool,
    pub weight: i64,
    pub priority: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<&Snippet> for SnippetSummary {
    fn from(snippet: &Snippet) -> Self {
        Self {
            id: snippet.id,
            name: snippet.name.clone(),
            kind: snippet.kind,
            disabled: snippet.disabled,
            weight: snippet.weight,
            priority: snippet.priority,
            updated_at: snippet.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub page: usize,
    pub num_pages: usize,
    pub total: usize,
    pub pagination_range: Vec<usize>,
    pub snippets: Vec<SnippetSummary>,
}

/// `GET /index/` — paginated listing of rich snippets.
pub async fn index_snippets(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<Response, AppError> {
    index_of_kind(state, query, SnippetKind::Rich).await
}

/// `GET /index/json/` — paginated listing of JSON snippets.
pub async fn index_json_snippets(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<Response, AppError> {
    index_of_kind(state, query, SnippetKind::Json).await
}

async fn index_of_kind(
    state: AppState,
    query: IndexQuery,
    kind: SnippetKind,
) -> Result<Response, AppError> {
    let filter = query.channel_filter();
    let total = state.snippets.count_filtered(kind, filter).await?;
    let page = Page::resolve(
        total,
        state.config.snippets_per_page,
        pagination::parse_page(query.page.as_deref()),
    );
    let rows = state.snippets.list_snippets(kind, filter, &page).await?;

    let body = IndexResponse {
        page: page.number,
        num_pages: page.num_pages,
        total,
        pagination_range: page.range(),
        snippets: rows.iter().map(SnippetSummary::from).collect(),
    };
    Ok(Json(body).into_response())
}
