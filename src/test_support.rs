//! In-process stand-in for the media host and the GitHub API, used by tests.
//! Every request is recorded so tests can assert on outbound payloads.

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct FakeUpstreamOptions {
    /// Number of initial upload attempts answered with 503.
    pub failing_uploads: u32,
    pub dispatch_status: StatusCode,
    /// Forces an error status on release lookups.
    pub release_status: Option<StatusCode>,
    pub releases: Vec<Value>,
    pub runs: Vec<Value>,
}

impl Default for FakeUpstreamOptions {
    fn default() -> Self {
        Self {
            failing_uploads: 0,
            dispatch_status: StatusCode::NO_CONTENT,
            release_status: None,
            releases: Vec::new(),
            runs: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedUpload {
    pub public_id: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub checksum: String,
    pub authorization: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RecordedDispatch {
    pub path: String,
    pub body: Value,
    pub authorization: Option<String>,
    pub api_version: Option<String>,
}

struct FakeState {
    base_url: String,
    options: FakeUpstreamOptions,
    upload_attempts: AtomicU32,
    uploads: Mutex<Vec<RecordedUpload>>,
    dispatches: Mutex<Vec<RecordedDispatch>>,
}

pub struct FakeUpstream {
    addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeUpstream {
    pub async fn start(options: FakeUpstreamOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(FakeState {
            base_url: format!("http://{}", addr),
            options,
            upload_attempts: AtomicU32::new(0),
            uploads: Mutex::new(Vec::new()),
            dispatches: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/upload", post(upload))
            .route("/repos/{owner}/{repo}/dispatches", post(dispatch))
            .route("/repos/{owner}/{repo}/releases/tags/{tag}", get(release))
            .route("/repos/{owner}/{repo}/actions/runs", get(runs))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn dispatches(&self) -> Vec<RecordedDispatch> {
        self.state.dispatches.lock().unwrap().clone()
    }

    pub fn upload_attempts(&self) -> u32 {
        self.state.upload_attempts.load(Ordering::SeqCst)
    }
}

pub fn fake_release(tag: &str, assets: &[&str]) -> Value {
    json!({
        "tag_name": tag,
        "html_url": format!("https://github.example/releases/{}", tag),
        "assets": assets
            .iter()
            .map(|name| json!({
                "name": name,
                "browser_download_url": format!("https://downloads.example/{}/{}", tag, name),
            }))
            .collect::<Vec<_>>(),
    })
}

pub fn fake_run(id: u64, title: &str, status: &str, conclusion: Option<&str>, created_at: &str) -> Value {
    json!({
        "id": id,
        "name": "Build app",
        "display_title": title,
        "status": status,
        "conclusion": conclusion,
        "html_url": format!("https://github.example/runs/{}", id),
        "created_at": created_at,
    })
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn upload(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let attempt = state.upload_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    let mut record = RecordedUpload {
        public_id: String::new(),
        file_name: None,
        content_type: None,
        size: 0,
        checksum: String::new(),
        authorization: header(&headers, "authorization"),
    };
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                record.file_name = field.file_name().map(str::to_string);
                record.content_type = field.content_type().map(str::to_string);
                record.size = field.bytes().await.unwrap().len();
            }
            "public_id" => record.public_id = field.text().await.unwrap(),
            "checksum" => record.checksum = field.text().await.unwrap(),
            _ => {}
        }
    }

    if attempt <= state.options.failing_uploads {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }

    let body = json!({
        "secure_url": format!("{}/cdn/{}", state.base_url, record.public_id),
        "public_id": record.public_id,
    });
    state.uploads.lock().unwrap().push(record);
    Json(body).into_response()
}

async fn dispatch(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<Value>,
) -> StatusCode {
    state.dispatches.lock().unwrap().push(RecordedDispatch {
        path: uri.path().to_string(),
        body,
        authorization: header(&headers, "authorization"),
        api_version: header(&headers, "x-github-api-version"),
    });
    state.options.dispatch_status
}

async fn release(
    State(state): State<Arc<FakeState>>,
    Path((_owner, _repo, tag)): Path<(String, String, String)>,
) -> Response {
    if let Some(status) = state.options.release_status {
        return (status, Json(json!({ "message": "boom" }))).into_response();
    }
    match state
        .options
        .releases
        .iter()
        .find(|r| r["tag_name"] == tag.as_str())
    {
        Some(found) => Json(found.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response(),
    }
}

async fn runs(State(state): State<Arc<FakeState>>) -> Json<Value> {
    Json(json!({
        "total_count": state.options.runs.len(),
        "workflow_runs": state.options.runs,
    }))
}
