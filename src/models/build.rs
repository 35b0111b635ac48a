//! Build requests, the tickets handed back to clients, and reported build status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A build accepted by this instance and dispatched to CI.
///
/// Kept in memory only; the CI platform remains the source of truth for progress.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BuildRecord {
    pub build_id: Uuid,
    pub app_name: String,
    pub package_name: String,
    pub icon_url: String,
    pub archive_url: String,
    pub gradle_version: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Response body for an accepted build submission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BuildTicket {
    pub build_id: Uuid,
    pub status: String,
    pub icon_url: String,
    pub archive_url: String,
    pub gradle_version: Option<String>,
    pub status_url: String,
}

/// Coarse build state derived from CI releases and workflow runs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
}

/// Response body for a status query.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BuildStatus {
    pub build_id: Uuid,
    pub state: BuildState,
    pub completed: bool,
    pub conclusion: Option<String>,
    pub download_url: Option<String>,
    pub run_url: Option<String>,
}

impl BuildStatus {
    pub fn new(build_id: Uuid, state: BuildState) -> Self {
        Self {
            build_id,
            state,
            completed: state == BuildState::Completed,
            conclusion: None,
            download_url: None,
            run_url: None,
        }
    }
}
