//! HTTP handlers for snippet delivery: the fetch endpoints, JSON delivery,
//! preview, show, the active listing, and bundle artifact streaming.

use crate::errors::AppError;
use crate::matching;
use crate::models::client::ClientDescriptor;
use crate::models::snippet::SnippetKind;
use crate::services::snippet_service::SnippetError;
use crate::state::AppState;
use axum::{
    Form, Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Optional tri-state channel-flag filters accepted by JSON delivery and
/// the index views, e.g. `?on_nightly=2`.
#[derive(Debug, Default, Deserialize)]
pub struct ChannelFilterQuery {
    pub on_release: Option<String>,
    pub on_beta: Option<String>,
    pub on_aurora: Option<String>,
    pub on_nightly: Option<String>,
}

impl ChannelFilterQuery {
    /// First present filter with an integer value. Non-integer values are
    /// ignored rather than erroring.
    pub fn channel_filter(&self) -> Option<(&'static str, i64)> {
        [
            ("release", &self.on_release),
            ("beta", &self.on_beta),
            ("aurora", &self.on_aurora),
            ("nightly", &self.on_nightly),
        ]
        .into_iter()
        .find_map(|(channel, raw)| {
            raw.as_deref()
                .and_then(|v| v.parse::<i64>().ok())
                .map(|value| (channel, value))
        })
    }
}

/// `GET /{…ten client fields…}/` — the main fetch endpoint. The serving
/// mode is a static configuration flag: inline rendering per request, or a
/// 302 to the cached bundle artifact.
pub async fn fetch_snippets(
    State(state): State<AppState>,
    Path(client): Path<ClientDescriptor>,
) -> Result<Response, AppError> {
    if state.config.serve_bundles {
        fetch_pregenerated_snippets(state, client).await
    } else {
        fetch_render_snippets(state, client).await
    }
}

/// Inline mode: render the document into the response body. The ETag is a
/// content hash of the body, and Vary names If-None-Match so caches key on
/// it.
async fn fetch_render_snippets(
    state: AppState,
    client: ClientDescriptor,
) -> Result<Response, AppError> {
    let body = state.bundles.render_document(&client).await?;
    let etag = format!("{:x}", md5::compute(&body));

    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, cache_control(&state));
    headers.insert(header::VARY, HeaderValue::from_static("If-None-Match"));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}

/// Bundle mode: redirect to the artifact. No Vary header; the artifact
/// itself, not this endpoint, is content-negotiated.
async fn fetch_pregenerated_snippets(
    state: AppState,
    client: ClientDescriptor,
) -> Result<Response, AppError> {
    let bundle = state.bundles.get_or_create(&client).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&bundle.url) {
        headers.insert(header::LOCATION, value);
    }
    headers.insert(header::CACHE_CONTROL, cache_control(&state));
    Ok(response)
}

/// `GET /json/{…ten client fields…}/` — matching JSON-kind snippets as a
/// JSON array. Never sets a Vary header.
pub async fn fetch_json_snippets(
    State(state): State<AppState>,
    Path(client): Path<ClientDescriptor>,
    Query(query): Query<ChannelFilterQuery>,
) -> Result<Response, AppError> {
    let candidates = state.snippets.fetch_candidates(SnippetKind::Json).await?;
    let mut matched = matching::match_snippets(candidates, &client, Utc::now(), false);
    if let Some((channel, value)) = query.channel_filter() {
        matched = matching::filter_channel_eq(matched, channel, value);
    }

    let items: Vec<serde_json::Value> = matched.iter().map(|s| s.to_json_value()).collect();
    let mut response = Json(items).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, cache_control(&state));
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct PreviewForm {
    pub template_id: Option<String>,
    pub data: Option<String>,
}

/// `POST /preview/` — render arbitrary data through a stored template.
/// Staff only; missing or invalid template_id and unparseable data are 400s.
pub async fn preview_snippet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<PreviewForm>,
) -> Result<Response, AppError> {
    if !state.is_staff(&headers) {
        return Err(AppError::not_found("not found"));
    }

    let template_id = form
        .template_id
        .as_deref()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| AppError::bad_request("missing or invalid template_id"))?;

    let template = match state.snippets.get_template(template_id).await {
        Ok(template) => template,
        Err(SnippetError::TemplateNotFound(id)) => {
            return Err(AppError::bad_request(format!("unknown template {id}")));
        }
        Err(err) => return Err(err.into()),
    };

    let payload = form
        .data
        .as_deref()
        .ok_or_else(|| AppError::bad_request("missing data"))?;
    let data = crate::render::parse_data(payload)
        .map_err(|err| AppError::bad_request(format!("invalid data: {err}")))?;

    let body = crate::render::render(&template.code, &data);
    Ok(html_response(body))
}

/// `GET /show/{snippet_id}/` — render a single snippet. Disabled snippets
/// are a 404 for everyone but staff; the status never distinguishes
/// "disabled" from "nonexistent".
pub async fn show_snippet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(snippet_id): Path<i64>,
) -> Result<Response, AppError> {
    let snippet = state.snippets.get_snippet(snippet_id).await?;
    if snippet.disabled && !state.is_staff(&headers) {
        return Err(AppError::not_found(format!("snippet {snippet_id} not found")));
    }

    let body = match snippet.kind {
        SnippetKind::Rich => state
            .bundles
            .render_snippet(&snippet)
            .await?
            .unwrap_or_default(),
        SnippetKind::Json => snippet.to_json_value().to_string(),
    };
    Ok(html_response(body))
}

/// `GET /active/` — ids and names of every enabled snippet, both kinds.
pub async fn active_snippets(State(state): State<AppState>) -> Result<Response, AppError> {
    let items = state.snippets.active_snippets().await?;
    Ok(Json(items).into_response())
}

/// `GET /robots.txt`
pub async fn robots_txt(State(state): State<AppState>) -> Response {
    let permission = if state.config.engage_robots {
        "Allow"
    } else {
        "Disallow"
    };
    let body = format!("User-agent: *\n{permission}: /");
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// `GET /media/bundles/{filename}` — stream a bundle artifact from disk.
pub async fn serve_bundle(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let file = state.bundles.open_artifact(&filename).await?;
    let stream = ReaderStream::new(file);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, cache_control(&state));
    Ok(response)
}

fn cache_control(state: &AppState) -> HeaderValue {
    let value = format!("public, max-age={}", state.config.http_max_age);
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("public"))
}

fn html_response(body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}
