pub mod bundle_service;
pub mod snippet_service;
