//! HTTP handlers for build submission and status.
//! Upload fields are streamed into the staging area as they arrive; the
//! pipeline itself lives in `BuildService`.

use crate::{
    errors::AppError,
    models::build::{BuildStatus, BuildTicket},
    services::{
        archive_service::LooseFile,
        build_service::{BuildRequest, BuildService, ServiceError},
        staging_service::StagingError,
    },
    validation::{ValidationError, parse_build_id},
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tracing::{debug, info};

/// Query form of the status endpoint: `GET /status?build_id=...`.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(alias = "buildId", alias = "id")]
    pub build_id: Option<String>,
}

/// `POST /build`: accept a multipart build submission.
pub async fn submit_build(
    State(service): State<BuildService>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BuildTicket>), AppError> {
    let mut request = BuildRequest::default();
    if let Err(err) = collect_form(&service, &mut multipart, &mut request).await {
        request.discard().await;
        return Err(err);
    }

    let ticket = service.submit(request).await?;
    info!(
        "accepted build {} (gradle {:?})",
        ticket.build_id, ticket.gradle_version
    );
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// `GET /build/{build_id}`: report build progress.
pub async fn build_status(
    State(service): State<BuildService>,
    Path(build_id): Path<String>,
) -> Result<Json<BuildStatus>, AppError> {
    status_for(&service, &build_id).await
}

/// `GET /status?build_id=...`: same as `build_status`, for clients that send a query string.
pub async fn build_status_query(
    State(service): State<BuildService>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<BuildStatus>, AppError> {
    let build_id = query
        .build_id
        .ok_or(ServiceError::Validation(ValidationError::MissingField("build_id")))?;
    status_for(&service, &build_id).await
}

async fn status_for(service: &BuildService, raw_id: &str) -> Result<Json<BuildStatus>, AppError> {
    let build_id = parse_build_id(raw_id).map_err(ServiceError::from)?;
    let status = service.status(build_id).await?;
    Ok(Json(status))
}

async fn collect_form(
    service: &BuildService,
    multipart: &mut Multipart,
    request: &mut BuildRequest,
) -> Result<(), AppError> {
    let limits = &service.settings;
    let mut loose_bytes: u64 = 0;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "app_name" | "appName" => request.app_name = Some(field.text().await?),
            "package_name" | "packageName" => request.package_name = Some(field.text().await?),
            "gradle_version" | "gradleVersion" => {
                request.gradle_version = Some(field.text().await?)
            }
            "icon" => {
                let asset = stage_field(service, field, "icon", limits.max_icon_bytes).await?;
                if let Some(previous) = request.icon.replace(asset) {
                    previous.discard().await;
                }
            }
            "archive" | "zip" => {
                let asset =
                    stage_field(service, field, "project.zip", limits.max_archive_bytes).await?;
                if let Some(previous) = request.archive.replace(asset) {
                    previous.discard().await;
                }
            }
            "files" | "files[]" => {
                let path = field.file_name().map(str::to_string).ok_or_else(|| {
                    AppError::bad_request("missing_field", "every `files` entry needs a filename")
                })?;
                let remaining = limits.max_archive_bytes.saturating_sub(loose_bytes);
                let data = read_limited(field, remaining, limits.max_archive_bytes).await?;
                loose_bytes += data.len() as u64;
                request.files.push(LooseFile { path, data });
            }
            other => debug!("ignoring unknown form field `{}`", other),
        }
    }
    Ok(())
}

async fn stage_field(
    service: &BuildService,
    field: Field<'_>,
    fallback_name: &str,
    limit: u64,
) -> Result<crate::services::staging_service::StagedAsset, AppError> {
    let file_name = field
        .file_name()
        .filter(|n| !n.is_empty())
        .unwrap_or(fallback_name)
        .to_string();
    let content_type = field.content_type().map(str::to_string);
    let stream = field.map(|chunk| chunk.map_err(io::Error::other));

    let asset = service
        .staging
        .stage_stream(&file_name, content_type, stream, limit)
        .await?;
    Ok(asset)
}

async fn read_limited(mut field: Field<'_>, remaining: u64, limit: u64) -> Result<Bytes, AppError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await? {
        if (buf.len() + chunk.len()) as u64 > remaining {
            return Err(StagingError::TooLarge { limit }.into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
