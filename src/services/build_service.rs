//! src/services/build_service.rs
//!
//! BuildService runs the submission pipeline (validate, upload assets to the
//! media host, dispatch the CI workflow) and answers status queries by reading
//! releases and workflow runs back from GitHub.

use crate::{
    config::{AppConfig, MAX_ICON_BYTES},
    models::{
        asset::AssetKind,
        build::{BuildRecord, BuildState, BuildStatus, BuildTicket},
    },
    services::{
        archive_service::{ArchiveError, LooseFile, assemble_archive, detect_build_tool},
        github_client::{DispatchPayload, GithubClient, WorkflowRun},
        media_client::MediaClient,
        staging_service::{StagedAsset, Staging, StagingError},
        upstream::{RetryPolicy, UpstreamError},
    },
    validation::{self, ValidationError},
};
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use std::{collections::HashMap, io, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes inspected for file signatures.
const SIGNATURE_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("media upload failed: {0}")]
    MediaUpload(#[source] UpstreamError),
    #[error("workflow dispatch failed: {0}")]
    Dispatch(#[source] UpstreamError),
    #[error("status query failed: {0}")]
    StatusQuery(#[source] UpstreamError),
    #[error("build `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ArchiveError> for ServiceError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Invalid(err) => Self::Validation(err),
            ArchiveError::Write(err) => Self::Io(io::Error::other(err)),
            ArchiveError::Io(err) => Self::Io(err),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Raw submission as collected from the multipart form. Nothing is validated yet.
#[derive(Debug, Default)]
pub struct BuildRequest {
    pub app_name: Option<String>,
    pub package_name: Option<String>,
    pub icon: Option<StagedAsset>,
    pub archive: Option<StagedAsset>,
    pub files: Vec<LooseFile>,
    pub gradle_version: Option<String>,
}

impl BuildRequest {
    /// Release any staged payloads held by an abandoned request.
    pub async fn discard(self) {
        if let Some(icon) = self.icon {
            icon.discard().await;
        }
        if let Some(archive) = self.archive {
            archive.discard().await;
        }
    }
}

/// Builds remembered by a registry before the oldest are evicted.
pub const MAX_TRACKED_BUILDS: usize = 10_000;

/// Builds accepted by this process, keyed by build id. Bounded to `capacity`
/// entries; the oldest submission is evicted first.
#[derive(Clone)]
pub struct BuildRegistry {
    inner: Arc<RwLock<HashMap<Uuid, BuildRecord>>>,
    capacity: usize,
}

impl Default for BuildRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_BUILDS)
    }
}

impl BuildRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub async fn insert(&self, record: BuildRecord) {
        let mut builds = self.inner.write().await;
        while builds.len() >= self.capacity && !builds.contains_key(&record.build_id) {
            let Some(oldest) = builds
                .values()
                .min_by_key(|r| (r.submitted_at, r.build_id))
                .map(|r| r.build_id)
            else {
                break;
            };
            debug!("evicting build {} from the registry", oldest);
            builds.remove(&oldest);
        }
        builds.insert(record.build_id, record);
    }

    /// Forget a build whose outcome is now published on GitHub.
    pub async fn remove(&self, build_id: Uuid) -> Option<BuildRecord> {
        self.inner.write().await.remove(&build_id)
    }

    pub async fn get(&self, build_id: Uuid) -> Option<BuildRecord> {
        self.inner.read().await.get(&build_id).cloned()
    }
}

/// Tunables that do not belong to a specific client.
#[derive(Clone, Debug)]
pub struct BuildSettings {
    pub max_icon_bytes: u64,
    pub max_archive_bytes: u64,
    pub default_gradle_version: Option<String>,
    pub release_tag_prefix: String,
}

#[derive(Clone)]
pub struct BuildService {
    pub staging: Staging,
    pub settings: BuildSettings,
    media: MediaClient,
    github: GithubClient,
    registry: BuildRegistry,
}

struct Validated {
    app_name: String,
    package_name: String,
    gradle_override: Option<String>,
}

impl BuildService {
    pub fn new(
        staging: Staging,
        media: MediaClient,
        github: GithubClient,
        settings: BuildSettings,
    ) -> Self {
        Self {
            staging,
            settings,
            media,
            github,
            registry: BuildRegistry::default(),
        }
    }

    /// Wire the service from configuration using a shared HTTP client.
    pub fn from_config(cfg: &AppConfig, http: Client) -> Self {
        let media = MediaClient::new(
            http.clone(),
            cfg.media_url.clone(),
            cfg.media_token.clone(),
            RetryPolicy::new(cfg.upload_retries, cfg.retry_backoff),
        );
        let github = GithubClient::new(
            http,
            cfg.github_api_url.clone(),
            cfg.github_token.clone(),
            cfg.github_owner.clone(),
            cfg.github_repo.clone(),
            cfg.event_type.clone(),
        );
        let settings = BuildSettings {
            max_icon_bytes: MAX_ICON_BYTES,
            max_archive_bytes: cfg.max_archive_bytes,
            default_gradle_version: cfg.default_gradle_version.clone(),
            release_tag_prefix: cfg.release_tag_prefix.clone(),
        };
        Self::new(
            Staging::new(cfg.storage, cfg.staging_dir.clone()),
            media,
            github,
            settings,
        )
    }

    /// Validate a submission, upload its assets and dispatch the CI build.
    ///
    /// Staged payloads are released whether or not the pipeline succeeds.
    pub async fn submit(&self, mut request: BuildRequest) -> ServiceResult<BuildTicket> {
        let validated = match self.validate(&request).await {
            Ok(validated) => validated,
            Err(err) => {
                request.discard().await;
                return Err(err);
            }
        };

        let Some(icon) = request.icon.take() else {
            return Err(ValidationError::MissingField("icon").into());
        };
        let archive = match request.archive.take() {
            Some(archive) => archive,
            None => match self.archive_from_files(std::mem::take(&mut request.files)).await {
                Ok(archive) => archive,
                Err(err) => {
                    icon.discard().await;
                    return Err(err);
                }
            },
        };

        let result = self.run_pipeline(validated, &icon, &archive).await;
        icon.discard().await;
        archive.discard().await;
        result
    }

    async fn validate(&self, request: &BuildRequest) -> ServiceResult<Validated> {
        let app_name = validation::validate_app_name(
            request
                .app_name
                .as_deref()
                .ok_or(ValidationError::MissingField("app_name"))?,
        )?;
        let package_name = validation::validate_package_name(
            request
                .package_name
                .as_deref()
                .ok_or(ValidationError::MissingField("package_name"))?,
        )?;

        let icon = request
            .icon
            .as_ref()
            .ok_or(ValidationError::MissingField("icon"))?;
        validation::validate_icon(&icon.head(SIGNATURE_LEN).await?)?;

        match (&request.archive, request.files.is_empty()) {
            (Some(_), false) => return Err(ValidationError::ConflictingSources.into()),
            (None, true) => return Err(ValidationError::MissingField("archive").into()),
            (Some(archive), true) => {
                validation::validate_archive(&archive.head(SIGNATURE_LEN).await?)?
            }
            (None, false) => {}
        }

        let gradle_override = request
            .gradle_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(Validated {
            app_name,
            package_name,
            gradle_override,
        })
    }

    /// Zip loose files into a staged archive. The size limit was already applied to
    /// the raw file bytes on intake, so ZIP framing does not count against it.
    async fn archive_from_files(&self, files: Vec<LooseFile>) -> ServiceResult<StagedAsset> {
        let count = files.len();
        let bytes: Bytes = tokio::task::spawn_blocking(move || assemble_archive(files)).await??;
        info!("assembled {} loose files into a {} byte archive", count, bytes.len());
        let asset = self
            .staging
            .stage_bytes(
                "project.zip",
                Some("application/zip".into()),
                bytes,
                u64::MAX,
            )
            .await?;
        Ok(asset)
    }

    async fn detect_gradle(&self, archive: &StagedAsset) -> ServiceResult<Option<String>> {
        let reader = archive.open_reader()?;
        let hint = tokio::task::spawn_blocking(move || detect_build_tool(reader)).await??;
        Ok(hint
            .map(|h| h.gradle_version)
            .or_else(|| self.settings.default_gradle_version.clone()))
    }

    async fn run_pipeline(
        &self,
        validated: Validated,
        icon: &StagedAsset,
        archive: &StagedAsset,
    ) -> ServiceResult<BuildTicket> {
        let build_id = Uuid::new_v4();

        let gradle_version = match validated.gradle_override {
            Some(version) => Some(version),
            None => self.detect_gradle(archive).await?,
        };

        let icon_asset = self
            .media
            .upload(icon, &public_id(build_id, AssetKind::Icon))
            .await
            .map_err(ServiceError::MediaUpload)?;
        let archive_asset = self
            .media
            .upload(archive, &public_id(build_id, AssetKind::Source))
            .await
            .map_err(ServiceError::MediaUpload)?;

        let payload = DispatchPayload {
            build_id,
            app_name: validated.app_name.clone(),
            package_name: validated.package_name.clone(),
            icon_url: icon_asset.url.clone(),
            archive_url: archive_asset.url.clone(),
            gradle_version: gradle_version.clone(),
        };
        if let Err(err) = self.github.dispatch(&payload).await {
            warn!(
                "dispatch for build {} failed after assets were uploaded: {}",
                build_id, err
            );
            return Err(ServiceError::Dispatch(err));
        }

        self.registry
            .insert(BuildRecord {
                build_id,
                app_name: validated.app_name,
                package_name: validated.package_name,
                icon_url: icon_asset.url.clone(),
                archive_url: archive_asset.url.clone(),
                gradle_version: gradle_version.clone(),
                submitted_at: Utc::now(),
            })
            .await;

        Ok(BuildTicket {
            build_id,
            status: "dispatched".into(),
            icon_url: icon_asset.url,
            archive_url: archive_asset.url,
            gradle_version,
            status_url: format!("/build/{}", build_id),
        })
    }

    /// Report progress for a build from its release (if published) or its workflow run.
    pub async fn status(&self, build_id: Uuid) -> ServiceResult<BuildStatus> {
        let tag = format!("{}{}", self.settings.release_tag_prefix, build_id);
        if let Some(release) = self
            .github
            .release_by_tag(&tag)
            .await
            .map_err(ServiceError::StatusQuery)?
        {
            debug!("build {} published as release {}", build_id, release.tag_name);
            self.registry.remove(build_id).await;
            let mut status = BuildStatus::new(build_id, BuildState::Completed);
            status.conclusion = Some("success".into());
            status.download_url = release.download_url();
            return Ok(status);
        }

        if let Some(run) = self
            .github
            .find_run(build_id)
            .await
            .map_err(ServiceError::StatusQuery)?
        {
            return Ok(status_from_run(build_id, &run));
        }

        match self.registry.get(build_id).await {
            Some(_) => Ok(BuildStatus::new(build_id, BuildState::Pending)),
            None => Err(ServiceError::NotFound(build_id)),
        }
    }

    /// Readiness of local resources (the staging area).
    pub async fn ready(&self) -> Result<(), String> {
        self.staging.probe().await
    }

    #[cfg(test)]
    pub async fn record(&self, build_id: Uuid) -> Option<BuildRecord> {
        self.registry.get(build_id).await
    }
}

fn public_id(build_id: Uuid, kind: AssetKind) -> String {
    format!("{}/{}", build_id, kind.as_str())
}

/// Map a workflow run onto a build state. A successful run without a release
/// is still publishing its artifacts.
fn status_from_run(build_id: Uuid, run: &WorkflowRun) -> BuildStatus {
    let state = match run.status.as_deref() {
        Some("queued" | "requested" | "waiting" | "pending") => BuildState::Queued,
        Some("completed") => match run.conclusion.as_deref() {
            Some("success") => BuildState::InProgress,
            _ => BuildState::Failed,
        },
        _ => BuildState::InProgress,
    };
    let mut status = BuildStatus::new(build_id, state);
    if state == BuildState::Failed {
        status.conclusion = run.conclusion.clone().or_else(|| Some("unknown".into()));
    }
    status.run_url = run.html_url.clone();
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Secret, StorageMode},
        services::archive_service::assemble_archive,
        test_support::{FakeUpstream, FakeUpstreamOptions, fake_release, fake_run},
    };
    use reqwest::StatusCode;
    use std::time::Duration;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn service_for(fake: &FakeUpstream, staging: Staging) -> BuildService {
        let http = Client::new();
        BuildService::new(
            staging,
            MediaClient::new(
                http.clone(),
                fake.base_url(),
                Secret::new("media-token"),
                RetryPolicy::new(2, Duration::ZERO),
            ),
            GithubClient::new(http, fake.base_url(), Secret::new("gh-token"), "acme", "builder", "build-app"),
            BuildSettings {
                max_icon_bytes: MAX_ICON_BYTES,
                max_archive_bytes: 1024 * 1024,
                default_gradle_version: Some("8.0".into()),
                release_tag_prefix: "build-".into(),
            },
        )
    }

    async fn stage(staging: &Staging, name: &str, bytes: Bytes) -> StagedAsset {
        staging.stage_bytes(name, None, bytes, 1024 * 1024).await.unwrap()
    }

    fn gradle_project() -> Bytes {
        assemble_archive(vec![LooseFile {
            path: "gradle/wrapper/gradle-wrapper.properties".into(),
            data: Bytes::from_static(
                b"distributionUrl=https\\://services.gradle.org/distributions/gradle-8.4-all.zip",
            ),
        }])
        .unwrap()
    }

    async fn request(staging: &Staging) -> BuildRequest {
        BuildRequest {
            app_name: Some("Demo App".into()),
            package_name: Some("com.example.demo".into()),
            icon: Some(stage(staging, "icon.png", Bytes::from_static(PNG)).await),
            archive: Some(stage(staging, "app.zip", gradle_project()).await),
            ..BuildRequest::default()
        }
    }

    #[tokio::test]
    async fn submit_uploads_assets_then_dispatches() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let service = service_for(&fake, staging.clone());

        let ticket = service.submit(request(&staging).await).await.unwrap();
        assert_eq!(ticket.status, "dispatched");
        assert_eq!(ticket.gradle_version.as_deref(), Some("8.4"));
        assert_eq!(ticket.status_url, format!("/build/{}", ticket.build_id));

        let uploads = fake.uploads();
        let ids: Vec<_> = uploads.iter().map(|u| u.public_id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                format!("{}/icon", ticket.build_id),
                format!("{}/source", ticket.build_id)
            ]
        );

        let dispatches = fake.dispatches();
        assert_eq!(dispatches.len(), 1);
        let payload = &dispatches[0].body["client_payload"];
        assert_eq!(payload["app_name"], "Demo App");
        assert_eq!(payload["icon_url"], ticket.icon_url.as_str());
        assert_eq!(payload["archive_url"], ticket.archive_url.as_str());
        assert_eq!(payload["gradle_version"], "8.4");

        let record = service.record(ticket.build_id).await.unwrap();
        assert_eq!(record.package_name, "com.example.demo");
    }

    #[tokio::test]
    async fn loose_files_are_assembled_and_disk_staging_is_cleaned_up() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(StorageMode::Disk, dir.path());
        let service = service_for(&fake, staging.clone());

        let req = BuildRequest {
            app_name: Some("Demo".into()),
            package_name: Some("com.example.demo".into()),
            icon: Some(stage(&staging, "icon.png", Bytes::from_static(PNG)).await),
            files: vec![
                LooseFile {
                    path: "Demo/build.gradle".into(),
                    data: Bytes::from_static(b"classpath 'com.android.tools.build:gradle:7.4.2'"),
                },
                LooseFile {
                    path: "Demo/app/src/main/AndroidManifest.xml".into(),
                    data: Bytes::from_static(b"<manifest/>"),
                },
            ],
            ..BuildRequest::default()
        };

        let ticket = service.submit(req).await.unwrap();
        assert_eq!(ticket.gradle_version.as_deref(), Some("7.5"));
        assert_eq!(fake.uploads()[1].file_name.as_deref(), Some("project.zip"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Deterministic bytes that Deflate cannot shrink.
    fn incompressible(len: usize) -> Bytes {
        let mut state: u32 = 0x2545_f491;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect::<Vec<u8>>()
            .into()
    }

    fn sample_record(build_id: Uuid, offset_secs: i64) -> BuildRecord {
        BuildRecord {
            build_id,
            app_name: "Demo".into(),
            package_name: "com.example.demo".into(),
            icon_url: "https://cdn/icon".into(),
            archive_url: "https://cdn/source".into(),
            gradle_version: None,
            submitted_at: Utc::now() + chrono::Duration::seconds(offset_secs),
        }
    }

    fn dir_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn loose_files_exactly_at_limit_are_accepted() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let mut service = service_for(&fake, staging.clone());
        service.settings.max_archive_bytes = 4096;

        let req = BuildRequest {
            app_name: Some("Demo".into()),
            package_name: Some("com.example.demo".into()),
            icon: Some(stage(&staging, "icon.png", Bytes::from_static(PNG)).await),
            files: vec![LooseFile {
                path: "Demo/app/src/main/res/raw/blob.bin".into(),
                data: incompressible(4096),
            }],
            ..BuildRequest::default()
        };

        let ticket = service.submit(req).await.unwrap();
        let uploads = fake.uploads();
        assert_eq!(uploads[1].public_id, format!("{}/source", ticket.build_id));
        assert!(uploads[1].size > 4096);
    }

    #[tokio::test]
    async fn disk_staging_is_cleaned_up_after_validation_failure() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(StorageMode::Disk, dir.path());
        let service = service_for(&fake, staging.clone());

        let mut req = request(&staging).await;
        assert_eq!(dir_entries(dir.path()), 2);
        req.app_name = Some("Demo\u{7}App".into());
        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidAppName(_))));
        assert_eq!(dir_entries(dir.path()), 0);
        assert_eq!(fake.upload_attempts(), 0);
    }

    #[tokio::test]
    async fn disk_staging_is_cleaned_up_after_dispatch_failure() {
        let fake = FakeUpstream::start(FakeUpstreamOptions {
            dispatch_status: StatusCode::NOT_FOUND,
            ..FakeUpstreamOptions::default()
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::new(StorageMode::Disk, dir.path());
        let service = service_for(&fake, staging.clone());

        let req = request(&staging).await;
        assert_eq!(dir_entries(dir.path()), 2);
        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(_)));
        assert_eq!(fake.uploads().len(), 2);
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn registry_evicts_oldest_build_at_capacity() {
        let registry = BuildRegistry::with_capacity(2);
        let (first, second, third) = (
            sample_record(Uuid::new_v4(), 0),
            sample_record(Uuid::new_v4(), 1),
            sample_record(Uuid::new_v4(), 2),
        );
        let ids = (first.build_id, second.build_id, third.build_id);

        registry.insert(first).await;
        registry.insert(second).await;
        registry.insert(third).await;

        assert!(registry.get(ids.0).await.is_none());
        assert!(registry.get(ids.1).await.is_some());
        assert!(registry.get(ids.2).await.is_some());
        assert!(registry.remove(ids.1).await.is_some());
        assert!(registry.get(ids.1).await.is_none());
    }

    #[tokio::test]
    async fn default_gradle_version_and_override() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let service = service_for(&fake, staging.clone());

        let mut req = request(&staging).await;
        req.archive = Some(
            stage(
                &staging,
                "app.zip",
                assemble_archive(vec![LooseFile {
                    path: "README.md".into(),
                    data: Bytes::from_static(b"hi"),
                }])
                .unwrap(),
            )
            .await,
        );
        let ticket = service.submit(req).await.unwrap();
        assert_eq!(ticket.gradle_version.as_deref(), Some("8.0"));

        let mut req = request(&staging).await;
        req.gradle_version = Some(" 7.6 ".into());
        let ticket = service.submit(req).await.unwrap();
        assert_eq!(ticket.gradle_version.as_deref(), Some("7.6"));
    }

    #[tokio::test]
    async fn validation_failures_make_no_upstream_calls() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let service = service_for(&fake, staging.clone());

        let mut req = request(&staging).await;
        req.package_name = Some("not a package".into());
        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidPackageName { .. })));

        let mut req = request(&staging).await;
        req.icon = Some(stage(&staging, "icon.gif", Bytes::from_static(b"GIF89a....")).await);
        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidIcon)));

        let mut req = request(&staging).await;
        req.files.push(LooseFile {
            path: "x".into(),
            data: Bytes::new(),
        });
        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::ConflictingSources)));

        let mut req = request(&staging).await;
        req.archive = None;
        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::MissingField("archive"))));

        assert_eq!(fake.upload_attempts(), 0);
        assert!(fake.dispatches().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_after_uploads() {
        let fake = FakeUpstream::start(FakeUpstreamOptions {
            dispatch_status: StatusCode::NOT_FOUND,
            ..FakeUpstreamOptions::default()
        })
        .await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let service = service_for(&fake, staging.clone());

        let err = service.submit(request(&staging).await).await.unwrap_err();
        assert!(matches!(err, ServiceError::Dispatch(_)));
        assert_eq!(fake.uploads().len(), 2);
    }

    #[tokio::test]
    async fn media_failure_stops_before_dispatch() {
        let fake = FakeUpstream::start(FakeUpstreamOptions {
            failing_uploads: 10,
            ..FakeUpstreamOptions::default()
        })
        .await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let service = service_for(&fake, staging.clone());

        let err = service.submit(request(&staging).await).await.unwrap_err();
        assert!(matches!(err, ServiceError::MediaUpload(_)));
        assert!(fake.dispatches().is_empty());
    }

    #[tokio::test]
    async fn status_reports_release_download() {
        let build_id = Uuid::new_v4();
        let tag = format!("build-{}", build_id);
        let fake = FakeUpstream::start(FakeUpstreamOptions {
            releases: vec![fake_release(&tag, &["app-release.apk"])],
            ..FakeUpstreamOptions::default()
        })
        .await;
        let service = service_for(&fake, Staging::new(StorageMode::Memory, "unused"));
        service.registry.insert(sample_record(build_id, 0)).await;

        let status = service.status(build_id).await.unwrap();
        assert_eq!(status.state, BuildState::Completed);
        assert!(service.record(build_id).await.is_none());
        assert!(status.completed);
        assert_eq!(
            status.download_url,
            Some(format!("https://downloads.example/{}/app-release.apk", tag))
        );
    }

    #[tokio::test]
    async fn status_follows_workflow_run() {
        let running = Uuid::new_v4();
        let failed = Uuid::new_v4();
        let publishing = Uuid::new_v4();
        let fake = FakeUpstream::start(FakeUpstreamOptions {
            runs: vec![
                fake_run(1, &format!("Build {}", running), "in_progress", None, "2026-01-01T10:00:00Z"),
                fake_run(2, &format!("Build {}", failed), "completed", Some("failure"), "2026-01-01T10:00:00Z"),
                fake_run(3, &format!("Build {}", publishing), "completed", Some("success"), "2026-01-01T10:00:00Z"),
            ],
            ..FakeUpstreamOptions::default()
        })
        .await;
        let service = service_for(&fake, Staging::new(StorageMode::Memory, "unused"));

        let status = service.status(running).await.unwrap();
        assert_eq!(status.state, BuildState::InProgress);
        assert_eq!(status.run_url.as_deref(), Some("https://github.example/runs/1"));

        let status = service.status(failed).await.unwrap();
        assert_eq!(status.state, BuildState::Failed);
        assert_eq!(status.conclusion.as_deref(), Some("failure"));
        assert!(!status.completed);

        let status = service.status(publishing).await.unwrap();
        assert_eq!(status.state, BuildState::InProgress);
    }

    #[tokio::test]
    async fn status_of_local_build_without_run_is_pending() {
        let fake = FakeUpstream::start(FakeUpstreamOptions::default()).await;
        let staging = Staging::new(StorageMode::Memory, "unused");
        let service = service_for(&fake, staging.clone());

        let ticket = service.submit(request(&staging).await).await.unwrap();
        let status = service.status(ticket.build_id).await.unwrap();
        assert_eq!(status.state, BuildState::Pending);
        assert!(service.record(ticket.build_id).await.is_some());

        let err = service.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn upstream_status_errors_surface() {
        let fake = FakeUpstream::start(FakeUpstreamOptions {
            release_status: Some(StatusCode::UNAUTHORIZED),
            ..FakeUpstreamOptions::default()
        })
        .await;
        let service = service_for(&fake, Staging::new(StorageMode::Memory, "unused"));
        let err = service.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::StatusQuery(_)));
    }
}
