//! Shared handler state: configuration plus the two services.

use crate::config::AppConfig;
use crate::services::{bundle_service::BundleService, snippet_service::SnippetService};
use axum::http::{HeaderMap, header};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub snippets: SnippetService,
    pub bundles: BundleService,
}

impl AppState {
    /// A request is staff when it carries the configured bearer token.
    /// With no token configured, nobody is staff.
    pub fn is_staff(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.config.staff_token else {
            return false;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|candidate| candidate == token)
            .unwrap_or(false)
    }
}
