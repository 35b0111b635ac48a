use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Fixed upper bound for the icon image.
pub const MAX_ICON_BYTES: u64 = 5 * 1024 * 1024;

/// Where uploaded assets are held between receipt and the media-host upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageMode {
    Memory,
    Disk,
}

impl FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "disk" | "fs" => Ok(Self::Disk),
            other => Err(anyhow!("unknown storage mode `{}`", other)),
        }
    }
}

/// A credential read from the environment. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageMode,
    pub staging_dir: PathBuf,
    pub max_archive_bytes: u64,
    pub upload_retries: u32,
    pub retry_backoff: Duration,
    pub default_gradle_version: Option<String>,
    pub media_url: String,
    pub media_token: Secret,
    pub github_api_url: String,
    pub github_token: Secret,
    pub github_owner: String,
    pub github_repo: String,
    pub event_type: String,
    pub release_tag_prefix: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Relays app build requests to a media host and a CI dispatch webhook")]
pub struct Args {
    /// Host to bind to (overrides BUILD_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUILD_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Staging mode for uploads (overrides BUILD_RELAY_STORAGE)
    #[arg(long, value_enum)]
    pub storage: Option<StorageMode>,

    /// Directory for disk staging (overrides BUILD_RELAY_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Archive size limit in MiB (overrides BUILD_RELAY_MAX_ARCHIVE_MB)
    #[arg(long)]
    pub max_archive_mb: Option<u64>,

    /// Media upload attempts (overrides BUILD_RELAY_UPLOAD_RETRIES)
    #[arg(long)]
    pub upload_retries: Option<u32>,

    /// Base delay between media upload attempts (overrides BUILD_RELAY_RETRY_BACKOFF_MS)
    #[arg(long)]
    pub retry_backoff_ms: Option<u64>,

    /// Gradle version used when none can be detected (overrides BUILD_RELAY_DEFAULT_GRADLE)
    #[arg(long)]
    pub default_gradle_version: Option<String>,

    /// Media host base URL (overrides MEDIA_HOST_URL)
    #[arg(long)]
    pub media_url: Option<String>,

    /// GitHub REST API base URL (overrides GITHUB_API_URL)
    #[arg(long)]
    pub github_api_url: Option<String>,

    /// Owner of the CI repository (overrides GITHUB_OWNER)
    #[arg(long)]
    pub github_owner: Option<String>,

    /// Name of the CI repository (overrides GITHUB_REPO)
    #[arg(long)]
    pub github_repo: Option<String>,

    /// repository_dispatch event type (overrides GITHUB_EVENT_TYPE)
    #[arg(long)]
    pub event_type: Option<String>,

    /// Release tag prefix used by the CI workflow (overrides GITHUB_RELEASE_TAG_PREFIX)
    #[arg(long)]
    pub release_tag_prefix: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge CLI args over values produced by `lookup` (normally the process environment).
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |cli: Option<String>, key: &str| {
            cli.or_else(|| text(key))
                .with_context(|| format!("missing required setting {}", key))
        };

        let env_port = parse_env(&lookup, "BUILD_RELAY_PORT")?.unwrap_or(3000);
        let env_storage = parse_env(&lookup, "BUILD_RELAY_STORAGE")?.unwrap_or(StorageMode::Memory);
        let env_max_mb = parse_env(&lookup, "BUILD_RELAY_MAX_ARCHIVE_MB")?.unwrap_or(100);
        let env_retries = parse_env(&lookup, "BUILD_RELAY_UPLOAD_RETRIES")?.unwrap_or(3);
        let env_backoff = parse_env(&lookup, "BUILD_RELAY_RETRY_BACKOFF_MS")?.unwrap_or(500);

        let media_token = text("MEDIA_HOST_TOKEN")
            .map(Secret::new)
            .context("missing required setting MEDIA_HOST_TOKEN")?;
        let github_token = text("GITHUB_TOKEN")
            .map(Secret::new)
            .context("missing required setting GITHUB_TOKEN")?;

        let max_archive_mb: u64 = args.max_archive_mb.unwrap_or(env_max_mb);
        if max_archive_mb == 0 {
            anyhow::bail!("archive size limit must be at least 1 MiB");
        }
        let max_archive_bytes = max_archive_mb
            .checked_mul(1024 * 1024)
            .filter(|bytes| body_limit_for(*bytes).is_some())
            .with_context(|| format!("archive size limit of {} MiB is too large", max_archive_mb))?;

        Ok(Self {
            host: args
                .host
                .or_else(|| text("BUILD_RELAY_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            storage: args.storage.unwrap_or(env_storage),
            staging_dir: args
                .staging_dir
                .or_else(|| text("BUILD_RELAY_STAGING_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./data/staging")),
            max_archive_bytes,
            upload_retries: args.upload_retries.unwrap_or(env_retries).max(1),
            retry_backoff: Duration::from_millis(args.retry_backoff_ms.unwrap_or(env_backoff)),
            default_gradle_version: args
                .default_gradle_version
                .or_else(|| text("BUILD_RELAY_DEFAULT_GRADLE")),
            media_url: trim_url(required(args.media_url, "MEDIA_HOST_URL")?),
            media_token,
            github_api_url: trim_url(
                args.github_api_url
                    .or_else(|| text("GITHUB_API_URL"))
                    .unwrap_or_else(|| "https://api.github.com".into()),
            ),
            github_token,
            github_owner: required(args.github_owner, "GITHUB_OWNER")?,
            github_repo: required(args.github_repo, "GITHUB_REPO")?,
            event_type: args
                .event_type
                .or_else(|| text("GITHUB_EVENT_TYPE"))
                .unwrap_or_else(|| "build-app".into()),
            release_tag_prefix: args
                .release_tag_prefix
                .or_else(|| lookup("GITHUB_RELEASE_TAG_PREFIX"))
                .unwrap_or_else(|| "build-".into()),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Largest request body accepted: the archive, the icon and some room for text fields.
    pub fn body_limit(&self) -> usize {
        body_limit_for(self.max_archive_bytes).unwrap_or(usize::MAX)
    }
}

fn body_limit_for(max_archive_bytes: u64) -> Option<usize> {
    let total = max_archive_bytes
        .checked_add(MAX_ICON_BYTES)?
        .checked_add(64 * 1024)?;
    usize::try_from(total).ok()
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", key, value, err)),
        _ => Ok(None),
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
