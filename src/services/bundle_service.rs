//! BundleService — pre-rendered bundle cache manager.
//!
//! A bundle is the full rendered document for one client fingerprint,
//! written to disk under a content-addressed name and tracked by a row in
//! the `bundles` table. Lookups are pull-based: a bundle is regenerated
//! lazily on the first request after it expires (TTL elapsed or content
//! updated), never proactively on content edits.
//!
//! Artifact writes are idempotent for identical inputs, so concurrent
//! regeneration for the same key needs no locking: both writers produce the
//! same file and the row update is last-write-wins over identical content.

use crate::matching;
use crate::models::bundle::Bundle;
use crate::models::client::{ClientDescriptor, TemplateFamily};
use crate::models::snippet::{Snippet, SnippetKind};
use crate::render;
use crate::services::snippet_service::{SnippetError, SnippetResult, SnippetService};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Pointer to a servable bundle artifact.
#[derive(Debug, Clone)]
pub struct BundleRef {
    pub url: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BundleService {
    db: Arc<SqlitePool>,
    snippets: SnippetService,
    bundles_dir: PathBuf,
    ttl: Duration,
    generations: Arc<AtomicU64>,
}

impl BundleService {
    pub fn new(
        db: Arc<SqlitePool>,
        snippets: SnippetService,
        bundles_dir: impl Into<PathBuf>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            snippets,
            bundles_dir: bundles_dir.into(),
            ttl: Duration::seconds(ttl_secs),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// How many bundle generations this instance has performed. Duplicate
    /// generations for the same key are a performance concern only.
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    /// Stable cache key over the full client fingerprint plus its template
    /// family.
    pub fn cache_key(client: &ClientDescriptor) -> String {
        let mut joined = client.fingerprint_fields().join("\x00");
        joined.push('\x00');
        joined.push_str(client.template_family().as_str());
        format!("{:x}", md5::compute(joined))
    }

    /// Return a servable bundle for this client, regenerating if missing or
    /// expired. Regeneration failures degrade to the last-known-good
    /// artifact when one exists (stale-but-valid beats a hard error).
    pub async fn get_or_create(&self, client: &ClientDescriptor) -> SnippetResult<BundleRef> {
        let key = Self::cache_key(client);
        let existing = self.fetch_bundle(&key).await?;

        if let Some(bundle) = &existing {
            if self.is_fresh(bundle).await? {
                debug!(cache_key = %key, "bundle cache hit");
                return Ok(bundle_ref(bundle));
            }
        }

        match self.generate(client, &key).await {
            Ok(bundle) => Ok(bundle),
            Err(err) => match existing {
                Some(stale) => {
                    warn!(cache_key = %key, error = %err, "bundle regeneration failed, serving stale artifact");
                    Ok(bundle_ref(&stale))
                }
                None => Err(err),
            },
        }
    }

    /// Render the full document for a client without touching the cache.
    /// Inline serving mode uses this directly.
    pub async fn render_document(&self, client: &ClientDescriptor) -> SnippetResult<String> {
        let candidates = self.snippets.fetch_candidates(SnippetKind::Rich).await?;
        let matched = matching::match_snippets(candidates, client, Utc::now(), false);

        let mut parts = Vec::with_capacity(matched.len());
        for snippet in &matched {
            match self.render_snippet(snippet).await? {
                Some(markup) => parts.push((snippet.id, markup)),
                None => continue,
            }
        }
        Ok(assemble_document(
            client.template_family(),
            &client.locale,
            &parts,
        ))
    }

    /// Render one snippet through its template. Snippets without a template,
    /// or whose template reference dangles, produce nothing; an unparseable
    /// stored payload renders best-effort with an empty data map. One broken
    /// snippet must never sink the whole document.
    pub async fn render_snippet(&self, snippet: &Snippet) -> SnippetResult<Option<String>> {
        let Some(template_id) = snippet.template_id else {
            warn!(snippet_id = snippet.id, "rich snippet has no template, skipping");
            return Ok(None);
        };
        let template = match self.snippets.get_template(template_id).await {
            Ok(template) => template,
            Err(SnippetError::TemplateNotFound(_)) => {
                warn!(
                    snippet_id = snippet.id,
                    template_id, "rich snippet references a missing template, skipping"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let mut data = match render::parse_data(&snippet.data) {
            Ok(map) => map,
            Err(err) => {
                warn!(snippet_id = snippet.id, %err, "stored payload unparseable, rendering empty");
                serde_json::Map::new()
            }
        };
        data.insert("snippet_id".into(), snippet.id.into());

        Ok(Some(render::render(&template.code, &data)))
    }

    /// Stream an artifact file for delivery. The filename comes from the
    /// URL, so reject anything path-like.
    pub async fn open_artifact(&self, filename: &str) -> SnippetResult<fs::File> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(SnippetError::BundleUnavailable(format!(
                "invalid artifact name `{filename}`"
            )));
        }
        let path = self.bundles_dir.join(filename);
        fs::File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                SnippetError::BundleUnavailable(format!("artifact `{filename}` not found"))
            } else {
                SnippetError::Io(err)
            }
        })
    }

    async fn fetch_bundle(&self, cache_key: &str) -> SnippetResult<Option<Bundle>> {
        let bundle = sqlx::query_as::<_, Bundle>(
            "SELECT cache_key, file_url, content_hash, generated_at FROM bundles \
             WHERE cache_key = ?",
        )
        .bind(cache_key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(bundle)
    }

    /// A bundle is fresh while its TTL has not elapsed and no content has
    /// been updated since it was generated.
    async fn is_fresh(&self, bundle: &Bundle) -> SnippetResult<bool> {
        if Utc::now() - bundle.generated_at >= self.ttl {
            return Ok(false);
        }
        if let Some(latest) = self.snippets.latest_update().await? {
            if latest > bundle.generated_at {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Build the document, write it as a new content-addressed artifact,
    /// then swap the bundle row. A previously served artifact is never
    /// overwritten in place.
    async fn generate(&self, client: &ClientDescriptor, key: &str) -> SnippetResult<BundleRef> {
        let body = self.render_document(client).await?;
        let content_hash = format!("{:x}", md5::compute(&body));
        let filename = format!("bundle_{key}_{content_hash}.html");
        let path = self.bundles_dir.join(&filename);

        fs::create_dir_all(&self.bundles_dir).await?;
        let tmp_path = self.bundles_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp_path).await?;
        if let Err(err) = write_all_durable(&mut file, body.as_bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SnippetError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SnippetError::Io(err));
        }

        let generated_at = Utc::now();
        let url = format!("/media/bundles/{filename}");
        sqlx::query(
            "INSERT INTO bundles (cache_key, file_url, content_hash, generated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(cache_key) DO UPDATE SET \
                 file_url = excluded.file_url, \
                 content_hash = excluded.content_hash, \
                 generated_at = excluded.generated_at",
        )
        .bind(key)
        .bind(&url)
        .bind(&content_hash)
        .bind(generated_at)
        .execute(&*self.db)
        .await?;

        self.generations.fetch_add(1, Ordering::Relaxed);
        debug!(cache_key = %key, %content_hash, "bundle generated");
        Ok(BundleRef { url, generated_at })
    }
}

fn bundle_ref(bundle: &Bundle) -> BundleRef {
    BundleRef {
        url: bundle.file_url.clone(),
        generated_at: bundle.generated_at,
    }
}

async fn write_all_durable(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Assemble the final document from rendered snippet fragments. The
/// activity-stream family gets its own wrapper class; both are plain
/// deterministic concatenation.
fn assemble_document(family: TemplateFamily, locale: &str, parts: &[(i64, String)]) -> String {
    let class = match family {
        TemplateFamily::Default => "snippet-container",
        TemplateFamily::ActivityStream => "snippet-container activity-stream",
    };
    let mut doc = String::with_capacity(256 + parts.iter().map(|(_, m)| m.len() + 64).sum::<usize>());
    doc.push_str(&format!(
        "<div id=\"snippets\" class=\"{class}\" data-locale=\"{}\">",
        render::html_escape(locale)
    ));
    for (id, markup) in parts {
        doc.push_str(&format!("<div class=\"snippet\" data-snippet-id=\"{id}\">"));
        doc.push_str(markup);
        doc.push_str("</div>");
    }
    doc.push_str("</div>");
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snippet::MatchRule;
    use crate::services::snippet_service::{NewSnippet, tests::test_pool};

    fn client() -> ClientDescriptor {
        ClientDescriptor {
            startpage_version: "4".into(),
            name: "Firefox".into(),
            version: "23.0a1".into(),
            appbuildid: "20130510041606".into(),
            build_target: "Darwin_Universal-gcc3".into(),
            locale: "en-US".into(),
            channel: "nightly".into(),
            os_version: "Darwin 10.8.0".into(),
            distribution: "default".into(),
            distribution_version: "default_version".into(),
        }
    }

    async fn services() -> (SnippetService, BundleService, tempfile::TempDir) {
        let pool = test_pool().await;
        let snippets = SnippetService::new(pool.clone());
        let dir = tempfile::tempdir().unwrap();
        let bundles = BundleService::new(pool, snippets.clone(), dir.path(), 3600);
        (snippets, bundles, dir)
    }

    async fn seed_snippet(snippets: &SnippetService, text: &str) -> i64 {
        let template = snippets
            .save_template(None, "basic", "<p>{{ text }}</p>")
            .await
            .unwrap();
        let snippet = snippets
            .create_snippet(NewSnippet {
                on_nightly: 1,
                template_id: Some(template.id),
                data: format!(r#"{{"text": "{text}"}}"#),
                ..Default::default()
            })
            .await
            .unwrap();
        snippet.id
    }

    #[test]
    fn cache_key_is_stable_and_field_sensitive() {
        let a = BundleService::cache_key(&client());
        let b = BundleService::cache_key(&client());
        assert_eq!(a, b);

        let mut other = client();
        other.locale = "fr".into();
        assert_ne!(a, BundleService::cache_key(&other));

        // Startpage version changes both a field and the template family.
        let mut activity_stream = client();
        activity_stream.startpage_version = "5".into();
        assert_ne!(a, BundleService::cache_key(&activity_stream));
    }

    #[tokio::test]
    async fn repeat_requests_hit_the_cache() {
        let (snippets, bundles, _dir) = services().await;
        seed_snippet(&snippets, "hello").await;

        let first = bundles.get_or_create(&client()).await.unwrap();
        let second = bundles.get_or_create(&client()).await.unwrap();
        assert_eq!(first.url, second.url);
        assert_eq!(bundles.generation_count(), 1);
    }

    #[tokio::test]
    async fn content_update_invalidates_the_bundle() {
        let (snippets, bundles, _dir) = services().await;
        let id = seed_snippet(&snippets, "hello").await;

        let first = bundles.get_or_create(&client()).await.unwrap();
        assert_eq!(bundles.generation_count(), 1);

        snippets
            .update_snippet_data(id, r#"{"text": "changed"}"#)
            .await
            .unwrap();
        let second = bundles.get_or_create(&client()).await.unwrap();
        assert_eq!(bundles.generation_count(), 2);
        assert_ne!(first.url, second.url);
    }

    #[tokio::test]
    async fn artifact_content_matches_rendered_document() {
        let (snippets, bundles, dir) = services().await;
        seed_snippet(&snippets, "hello <world>").await;

        let bundle = bundles.get_or_create(&client()).await.unwrap();
        let filename = bundle.url.rsplit('/').next().unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join(filename)).unwrap();
        assert_eq!(on_disk, bundles.render_document(&client()).await.unwrap());
        assert!(on_disk.contains("hello &lt;world&gt;"));
    }

    #[tokio::test]
    async fn artifact_names_reject_traversal() {
        let (_snippets, bundles, _dir) = services().await;
        assert!(bundles.open_artifact("../etc/passwd").await.is_err());
        assert!(bundles.open_artifact("a/b").await.is_err());
        assert!(bundles.open_artifact("").await.is_err());
    }

    #[tokio::test]
    async fn dangling_template_reference_is_skipped() {
        let (snippets, bundles, _dir) = services().await;
        seed_snippet(&snippets, "healthy").await;
        // The dangling reference violates the schema's foreign key, so
        // disable enforcement while seeding it; the single-connection
        // test pool makes the pragma stick for the insert.
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&*snippets.db)
            .await
            .unwrap();
        snippets
            .create_snippet(NewSnippet {
                on_nightly: 1,
                template_id: Some(999_999),
                ..Default::default()
            })
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&*snippets.db)
            .await
            .unwrap();

        let doc = bundles.render_document(&client()).await.unwrap();
        assert!(doc.contains("healthy"));
        assert!(bundles.get_or_create(&client()).await.is_ok());
    }

    #[tokio::test]
    async fn regeneration_failure_serves_stale_artifact() {
        let (snippets, bundles, _dir) = services().await;
        let id = seed_snippet(&snippets, "hello").await;
        let first = bundles.get_or_create(&client()).await.unwrap();

        // A bundles directory nested under a regular file can never be
        // created, so every artifact write fails.
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let broken = BundleService::new(
            snippets.db.clone(),
            snippets.clone(),
            blocker.path().join("nested"),
            3600,
        );
        snippets
            .update_snippet_data(id, r#"{"text": "changed"}"#)
            .await
            .unwrap();

        let served = broken.get_or_create(&client()).await.unwrap();
        assert_eq!(served.url, first.url);
        assert_eq!(broken.generation_count(), 0);
    }

    #[tokio::test]
    async fn snippet_without_template_is_skipped() {
        let (snippets, bundles, _dir) = services().await;
        snippets
            .create_snippet(NewSnippet {
                on_nightly: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let doc = bundles.render_document(&client()).await.unwrap();
        assert!(!doc.contains("data-snippet-id"));
    }

    #[tokio::test]
    async fn match_rules_narrow_the_document() {
        let (snippets, bundles, _dir) = services().await;
        let template = snippets
            .save_template(None, "basic", "<p>{{ text }}</p>")
            .await
            .unwrap();
        snippets
            .create_snippet(NewSnippet {
                on_nightly: 1,
                template_id: Some(template.id),
                data: r#"{"text": "darwin only"}"#.into(),
                match_rules: vec![MatchRule {
                    field: "os_version".into(),
                    pattern: "Darwin".into(),
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        snippets
            .create_snippet(NewSnippet {
                on_nightly: 1,
                template_id: Some(template.id),
                data: r#"{"text": "windows only"}"#.into(),
                match_rules: vec![MatchRule {
                    field: "os_version".into(),
                    pattern: "^WINNT".into(),
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let doc = bundles.render_document(&client()).await.unwrap();
        assert!(doc.contains("darwin only"));
        assert!(!doc.contains("windows only"));
    }
}
