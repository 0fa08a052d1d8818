//! Route table for the delivery surface.
//!
//! ## Structure
//! - **Delivery endpoints**
//!   - `GET /{…ten client fields…}/` — rendered or redirected bundle
//!   - `GET /json/{…ten client fields…}/` — matching JSON snippets
//!   - `GET /media/bundles/{filename}` — bundle artifact streaming
//! - **Single-snippet endpoints**
//!   - `POST /preview/` — staff-only template preview
//!   - `GET  /show/{snippet_id}/` — one snippet, 404 for disabled+anonymous
//! - **Listings & probes**
//!   - `GET /index/`, `GET /index/json/` — paginated listings
//!   - `GET /active/` — enabled snippet ids
//!   - `GET /healthz/` — liveness (storage + content present)
//!   - `GET /robots.txt`

use crate::handlers::{
    fetch_handlers::{
        active_snippets, fetch_json_snippets, fetch_snippets, preview_snippet, robots_txt,
        serve_bundle, show_snippet,
    },
    health_handlers::healthz,
    index_handlers::{index_json_snippets, index_snippets},
};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};

const CLIENT_FIELDS_PATH: &str = "/{startpage_version}/{name}/{version}/{appbuildid}\
/{build_target}/{locale}/{channel}/{os_version}/{distribution}/{distribution_version}/";

/// Build and return the router for the delivery surface. The router carries
/// shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz/", get(healthz))
        .route("/robots.txt", get(robots_txt))
        .route("/active/", get(active_snippets))
        .route("/preview/", post(preview_snippet))
        .route("/show/{snippet_id}/", get(show_snippet))
        .route("/index/", get(index_snippets))
        .route("/index/json/", get(index_json_snippets))
        .route("/media/bundles/{filename}", get(serve_bundle))
        .route(
            &format!("/json{CLIENT_FIELDS_PATH}"),
            get(fetch_json_snippets),
        )
        .route(CLIENT_FIELDS_PATH, get(fetch_snippets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::snippet::SnippetKind;
    use crate::services::bundle_service::BundleService;
    use crate::services::snippet_service::{
        NewSnippet, SnippetService, tests::test_pool,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use std::sync::Arc;
    use tower::ServiceExt;

    const STAFF_TOKEN: &str = "s3kr3t";
    const CLIENT_PATH: &str = "/4/Firefox/23.0a1/20130510041606/Darwin_Universal-gcc3\
/en-US/nightly/Darwin%2010.8.0/default/default_version/";

    async fn test_state(serve_bundles: bool) -> (AppState, tempfile::TempDir) {
        let pool = test_pool().await;
        let snippets = SnippetService::new(pool.clone());
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: String::new(),
            bundles_dir: dir.path().display().to_string(),
            serve_bundles,
            http_max_age: 90,
            bundle_ttl_secs: 3600,
            snippets_per_page: 1,
            staff_token: Some(STAFF_TOKEN.into()),
            engage_robots: false,
        };
        let bundles = BundleService::new(pool, snippets.clone(), dir.path(), 3600);
        let state = AppState {
            config: Arc::new(config),
            snippets,
            bundles,
        };
        (state, dir)
    }

    fn router(state: AppState) -> Router {
        routes().with_state(state)
    }

    async fn get_response(app: &Router, uri: &str) -> axum::response::Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn seed_rich_snippet(state: &AppState, text: &str, disabled: bool) -> i64 {
        let template = state
            .snippets
            .save_template(None, "basic", "<p>{{ text }}</p>")
            .await
            .unwrap();
        state
            .snippets
            .create_snippet(NewSnippet {
                name: text.into(),
                disabled,
                on_nightly: 1,
                template_id: Some(template.id),
                data: format!(r#"{{"text": "{text}"}}"#),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn fetch_serves_enabled_snippets_only() {
        let (state, _dir) = test_state(false).await;
        seed_rich_snippet(&state, "visible", false).await;
        seed_rich_snippet(&state, "hidden", true).await;
        let app = router(state);

        let response = get_response(&app, CLIENT_PATH).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("visible"));
        assert!(!body.contains("hidden"));
    }

    #[tokio::test]
    async fn fetch_inline_cache_headers() {
        let (state, _dir) = test_state(false).await;
        seed_rich_snippet(&state, "visible", false).await;
        let app = router(state);

        let response = get_response(&app, CLIENT_PATH).await;
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=90"
        );
        assert_eq!(response.headers()[header::VARY], "If-None-Match");

        let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
        let body = body_string(response).await;
        assert_eq!(etag, format!("{:x}", md5::compute(&body)));

        // Identical body on a second request gives an identical ETag.
        let again = get_response(&app, CLIENT_PATH).await;
        assert_eq!(again.headers()[header::ETAG].to_str().unwrap(), etag);
    }

    #[tokio::test]
    async fn fetch_bundle_mode_redirects_to_artifact() {
        let (state, _dir) = test_state(true).await;
        seed_rich_snippet(&state, "bundled", false).await;
        let app = router(state);

        let response = get_response(&app, CLIENT_PATH).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(response.headers().get(header::VARY).is_none());
        let location = response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(location.starts_with("/media/bundles/bundle_"));

        let artifact = get_response(&app, &location).await;
        assert_eq!(artifact.status(), StatusCode::OK);
        assert!(body_string(artifact).await.contains("bundled"));
    }

    #[tokio::test]
    async fn json_delivery_contract() {
        let (state, _dir) = test_state(false).await;
        let kept = state
            .snippets
            .create_snippet(NewSnippet {
                kind: SnippetKind::Json,
                on_nightly: 1,
                weight: 66,
                data: r#"{"text": "json snippet"}"#.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        state
            .snippets
            .create_snippet(NewSnippet {
                kind: SnippetKind::Json,
                on_nightly: 1,
                disabled: true,
                ..Default::default()
            })
            .await
            .unwrap();
        state
            .snippets
            .create_snippet(NewSnippet {
                kind: SnippetKind::Json,
                on_nightly: 0,
                ..Default::default()
            })
            .await
            .unwrap();
        let app = router(state);

        let response = get_response(&app, &format!("/json{CLIENT_PATH}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::VARY).is_none());
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("application/json")
        );

        let body = body_string(response).await;
        let items: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], kept.id);
        assert_eq!(items[0]["weight"], 66);
        assert_eq!(items[0]["text"], "json snippet");
    }

    #[tokio::test]
    async fn json_tri_state_filter() {
        let (state, _dir) = test_state(false).await;
        let staged = state
            .snippets
            .create_snippet(NewSnippet {
                kind: SnippetKind::Json,
                on_nightly: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        state
            .snippets
            .create_snippet(NewSnippet {
                kind: SnippetKind::Json,
                on_nightly: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let app = router(state);

        let response =
            get_response(&app, &format!("/json{CLIENT_PATH}?on_nightly=2")).await;
        let items: Vec<serde_json::Value> =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], staged.id);
    }

    async fn post_preview(app: &Router, auth: Option<&str>, form: &str) -> StatusCode {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/preview/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(token) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        app.clone()
            .oneshot(builder.body(Body::from(form.to_string())).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn preview_requires_staff() {
        let (state, _dir) = test_state(false).await;
        let app = router(state);
        assert_eq!(
            post_preview(&app, None, "template_id=1&data=%7B%7D").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            post_preview(&app, Some("wrong"), "template_id=1&data=%7B%7D").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn preview_validates_template_and_data() {
        let (state, _dir) = test_state(false).await;
        let template = state
            .snippets
            .save_template(None, "basic", "<p>{{ a }}</p>")
            .await
            .unwrap();
        let app = router(state);
        let auth = Some(STAFF_TOKEN);

        // Missing, empty, and unknown template ids are all 400s.
        assert_eq!(post_preview(&app, auth, "data=%7B%7D").await, StatusCode::BAD_REQUEST);
        assert_eq!(
            post_preview(&app, auth, "template_id=&data=%7B%7D").await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post_preview(&app, auth, "template_id=9999999&data=%7B%7D").await,
            StatusCode::BAD_REQUEST
        );

        // Missing or unparseable data is a 400.
        assert_eq!(
            post_preview(&app, auth, &format!("template_id={}", template.id)).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post_preview(
                &app,
                auth,
                &format!("template_id={}&data=%7Binvalid.%22json%5D", template.id)
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        // Valid template and data render.
        assert_eq!(
            post_preview(
                &app,
                auth,
                &format!("template_id={}&data=%7B%22a%22%3A%20%22b%22%7D", template.id)
            )
            .await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn show_snippet_visibility() {
        let (state, _dir) = test_state(false).await;
        let enabled = seed_rich_snippet(&state, "shown", false).await;
        let disabled = seed_rich_snippet(&state, "secret", true).await;
        let app = router(state);

        let response = get_response(&app, &format!("/show/{enabled}/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("shown"));

        let missing = get_response(&app, "/show/424242/").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        // Disabled snippets are a 404 for anonymous callers...
        let hidden = get_response(&app, &format!("/show/{disabled}/")).await;
        assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

        // ...but staff may preview them.
        let staff = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/show/{disabled}/"))
                    .header(header::AUTHORIZATION, format!("Bearer {STAFF_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(staff.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn index_pagination_clamps_and_ranges() {
        let (state, _dir) = test_state(false).await;
        for i in 0..10 {
            seed_rich_snippet(&state, &format!("snippet-{i}"), false).await;
        }
        let app = router(state);

        // Page size is 1, so ten snippets make ten pages.
        let first: serde_json::Value =
            serde_json::from_str(&body_string(get_response(&app, "/index/").await).await).unwrap();
        assert_eq!(first["page"], 1);
        assert_eq!(first["num_pages"], 10);
        assert_eq!(first["pagination_range"], serde_json::json!([1, 2, 3]));

        let beyond: serde_json::Value =
            serde_json::from_str(&body_string(get_response(&app, "/index/?page=20").await).await)
                .unwrap();
        assert_eq!(beyond["page"], 10);
        assert_eq!(beyond["pagination_range"], serde_json::json!([8, 9, 10]));

        let non_integer: serde_json::Value =
            serde_json::from_str(&body_string(get_response(&app, "/index/?page=k").await).await)
                .unwrap();
        assert_eq!(non_integer["page"], 1);

        let middle: serde_json::Value =
            serde_json::from_str(&body_string(get_response(&app, "/index/?page=5").await).await)
                .unwrap();
        assert_eq!(middle["pagination_range"], serde_json::json!([3, 4, 5, 6, 7]));
    }

    #[tokio::test]
    async fn index_channel_filter() {
        let (state, _dir) = test_state(false).await;
        seed_rich_snippet(&state, "plain", false).await;
        state
            .snippets
            .create_snippet(NewSnippet {
                name: "staged".into(),
                on_nightly: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        let app = router(state);

        let filtered: serde_json::Value = serde_json::from_str(
            &body_string(get_response(&app, "/index/?on_nightly=2").await).await,
        )
        .unwrap();
        assert_eq!(filtered["total"], 1);
        assert_eq!(filtered["snippets"][0]["name"], "staged");
    }

    #[tokio::test]
    async fn healthz_requires_content() {
        let (state, _dir) = test_state(false).await;
        let app = router(state.clone());

        let empty = get_response(&app, "/healthz/").await;
        assert_eq!(empty.status(), StatusCode::SERVICE_UNAVAILABLE);

        seed_rich_snippet(&state, "present", false).await;
        let healthy = get_response(&app, "/healthz/").await;
        assert_eq!(healthy.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn active_lists_enabled_snippets_of_both_kinds() {
        let (state, _dir) = test_state(false).await;
        let rich = seed_rich_snippet(&state, "rich", false).await;
        seed_rich_snippet(&state, "off", true).await;
        let json = state
            .snippets
            .create_snippet(NewSnippet {
                kind: SnippetKind::Json,
                on_nightly: 1,
                ..Default::default()
            })
            .await
            .unwrap()
            .id;
        let app = router(state);

        let body = body_string(get_response(&app, "/active/").await).await;
        let items: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![rich, json]);
    }

    #[tokio::test]
    async fn robots_disallow_by_default() {
        let (state, _dir) = test_state(false).await;
        let app = router(state);
        let body = body_string(get_response(&app, "/robots.txt").await).await;
        assert_eq!(body, "User-agent: *\nDisallow: /");
    }
}
