//! GitHub REST client: triggers the CI workflow through `repository_dispatch`
//! and reads back releases and workflow runs to report progress.

use crate::{
    config::Secret,
    services::upstream::{UpstreamError, ensure_success},
};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

const SERVICE: &str = "GitHub";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "build-relay";

/// `client_payload` of the dispatch event, consumed by the CI workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DispatchPayload {
    pub build_id: Uuid,
    pub app_name: String,
    pub package_name: String,
    pub icon_url: String,
    pub archive_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradle_version: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Release {
    pub tag_name: String,
    pub html_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub display_title: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub html_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
struct WorkflowRunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

impl Release {
    /// Best download link: an APK, then an app bundle, then any asset, then the release page.
    pub fn download_url(&self) -> Option<String> {
        let by_ext = |ext: &str| {
            self.assets
                .iter()
                .find(|a| a.name.to_ascii_lowercase().ends_with(ext))
        };
        by_ext(".apk")
            .or_else(|| by_ext(".aab"))
            .or_else(|| self.assets.first())
            .map(|a| a.browser_download_url.clone())
            .or_else(|| self.html_url.clone())
    }
}

impl WorkflowRun {
    fn mentions(&self, needle: &str) -> bool {
        [&self.display_title, &self.name]
            .into_iter()
            .flatten()
            .any(|text| text.contains(needle))
    }
}

#[derive(Clone, Debug)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    token: Secret,
    owner: String,
    repo: String,
    event_type: String,
}

impl GithubClient {
    pub fn new(
        http: Client,
        api_url: impl Into<String>,
        token: Secret,
        owner: impl Into<String>,
        repo: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            owner: owner.into(),
            repo: repo.into(),
            event_type: event_type.into(),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, self.repo, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(self.token.expose())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    /// Fire the `repository_dispatch` event that starts the CI build.
    pub async fn dispatch(&self, payload: &DispatchPayload) -> Result<(), UpstreamError> {
        let body = json!({
            "event_type": self.event_type,
            "client_payload": payload,
        });
        let response = self
            .authorized(self.http.post(self.repo_url("/dispatches")))
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;
        ensure_success(SERVICE, response).await?;

        info!(
            "dispatched {} for build {} to {}/{}",
            self.event_type, payload.build_id, self.owner, self.repo
        );
        Ok(())
    }

    /// Look up a release by tag. A missing release is `Ok(None)`.
    pub async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>, UpstreamError> {
        let mut url = Url::parse(&self.repo_url("/releases/tags")).map_err(|err| {
            UpstreamError::Decode {
                service: SERVICE,
                reason: format!("invalid API url: {}", err),
            }
        })?;
        // A single segment, so `/`, `?` and `#` in the tag are percent-encoded.
        url.path_segments_mut()
            .map_err(|()| UpstreamError::Decode {
                service: SERVICE,
                reason: "API url cannot carry a path".into(),
            })?
            .push(tag);

        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("no release tagged {}", tag);
            return Ok(None);
        }
        let response = ensure_success(SERVICE, response).await?;
        let release = response.json().await.map_err(|err| UpstreamError::Decode {
            service: SERVICE,
            reason: err.to_string(),
        })?;
        Ok(Some(release))
    }

    /// Newest dispatch-triggered workflow run whose title or name mentions `build_id`.
    pub async fn find_run(&self, build_id: Uuid) -> Result<Option<WorkflowRun>, UpstreamError> {
        let response = self
            .authorized(self.http.get(self.repo_url("/actions/runs")))
            .query(&[("event", "repository_dispatch"), ("per_page", "50")])
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;
        let response = ensure_success(SERVICE, response).await?;
        let list: WorkflowRunList = response.json().await.map_err(|err| UpstreamError::Decode {
            service: SERVICE,
            reason: err.to_string(),
        })?;

        let needle = build_id.to_string();
        Ok(list
            .workflow_runs
            .into_iter()
            .filter(|run| run.mentions(&needle))
            .max_by_key(|run| (run.created_at, run.id)))
    }
}
