use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; constructed once in
/// `main` and handed to the services, never read as ambient global state.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Directory where bundle artifacts are written.
    pub bundles_dir: String,
    /// Serve pre-generated bundles (302 to the artifact) instead of
    /// rendering inline per request.
    pub serve_bundles: bool,
    /// `max-age` for the Cache-Control header on fetch responses, seconds.
    pub http_max_age: u32,
    /// Bundle freshness TTL, seconds.
    pub bundle_ttl_secs: i64,
    /// Page size for index listings.
    pub snippets_per_page: usize,
    /// Bearer token that marks a request as staff. None disables staff
    /// access entirely.
    pub staff_token: Option<String>,
    /// Whether robots.txt allows crawling.
    pub engage_robots: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Targeted snippet delivery service")]
pub struct Args {
    /// Host to bind to (overrides SNIPPETS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SNIPPETS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides SNIPPETS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for bundle artifacts (overrides SNIPPETS_BUNDLES_DIR)
    #[arg(long)]
    pub bundles_dir: Option<String>,

    /// Serve pre-generated bundles instead of rendering inline
    #[arg(long)]
    pub serve_bundles: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("SNIPPETS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("SNIPPETS_PORT", 8000u16)?;
        let env_db = env::var("SNIPPETS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/snippets.db".into());
        let env_bundles =
            env::var("SNIPPETS_BUNDLES_DIR").unwrap_or_else(|_| "./data/bundles".into());
        let env_serve_bundles = env::var("SNIPPETS_SERVE_BUNDLES")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            bundles_dir: args.bundles_dir.unwrap_or(env_bundles),
            serve_bundles: args.serve_bundles || env_serve_bundles,
            http_max_age: parse_env("SNIPPETS_HTTP_MAX_AGE", 90u32)?,
            bundle_ttl_secs: parse_env("SNIPPETS_BUNDLE_TTL", 900i64)?,
            snippets_per_page: parse_env("SNIPPETS_PER_PAGE", 50usize)?,
            staff_token: env::var("SNIPPETS_STAFF_TOKEN").ok().filter(|t| !t.is_empty()),
            engage_robots: env::var("SNIPPETS_ENGAGE_ROBOTS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Manual impl so the staff token never lands in logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("bundles_dir", &self.bundles_dir)
            .field("serve_bundles", &self.serve_bundles)
            .field("http_max_age", &self.http_max_age)
            .field("bundle_ttl_secs", &self.bundle_ttl_secs)
            .field("snippets_per_page", &self.snippets_per_page)
            .field("staff_token", &self.staff_token.as_ref().map(|_| "<set>"))
            .field("engage_robots", &self.engage_robots)
            .finish()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {key}")),
    }
}
