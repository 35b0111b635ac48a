//! Client for the media host (object storage + CDN) that serves assets to CI.

use crate::{
    config::Secret,
    models::asset::UploadedAsset,
    services::{
        staging_service::StagedAsset,
        upstream::{RetryPolicy, UpstreamError, ensure_success, with_retry},
    },
};
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use tracing::info;

const SERVICE: &str = "media host";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    public_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MediaClient {
    http: Client,
    base_url: String,
    token: Secret,
    retry: RetryPolicy,
}

impl MediaClient {
    pub fn new(http: Client, base_url: impl Into<String>, token: Secret, retry: RetryPolicy) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            retry,
        }
    }

    /// Upload a staged asset under `public_id`, retrying transient failures.
    pub async fn upload(
        &self,
        asset: &StagedAsset,
        public_id: &str,
    ) -> Result<UploadedAsset, UpstreamError> {
        let operation = format!("upload of {}", public_id);
        let uploaded = with_retry(self.retry, &operation, || self.upload_once(asset, public_id)).await?;
        info!(
            "uploaded {} ({} bytes) as {} -> {}",
            asset.file_name, asset.size_bytes, uploaded.public_id, uploaded.url
        );
        Ok(uploaded)
    }

    async fn upload_once(
        &self,
        asset: &StagedAsset,
        public_id: &str,
    ) -> Result<UploadedAsset, UpstreamError> {
        // The multipart body is single-use, so every attempt rebuilds it.
        let form = Form::new()
            .part("file", asset.to_part().await?)
            .part("public_id", Part::text(public_id.to_string()))
            .part("checksum", Part::text(asset.md5.clone()));

        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .bearer_auth(self.token.expose())
            .multipart(form)
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;
        let response = ensure_success(SERVICE, response).await?;

        let body: UploadResponse = response.json().await.map_err(|err| UpstreamError::Decode {
            service: SERVICE,
            reason: err.to_string(),
        })?;
        let url = body
            .secure_url
            .or(body.url)
            .ok_or_else(|| UpstreamError::Decode {
                service: SERVICE,
                reason: "response carries no url".into(),
            })?;

        Ok(UploadedAsset {
            url,
            public_id: body.public_id.unwrap_or_else(|| public_id.to_string()),
        })
    }
}
