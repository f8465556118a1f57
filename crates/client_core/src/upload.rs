use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;

use crate::error::UploadError;

/// Stores a file for a room and returns the URL peers can fetch it from.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, room: &str, filename: &str, bytes: Vec<u8>)
        -> Result<String, UploadError>;
}

pub struct MissingUploader;

#[async_trait]
impl Uploader for MissingUploader {
    async fn upload(
        &self,
        _room: &str,
        _filename: &str,
        _bytes: Vec<u8>,
    ) -> Result<String, UploadError> {
        Err(UploadError::Unavailable)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: String,
    #[serde(default)]
    file_url: Option<String>,
}

pub struct HttpUploader {
    http: Client,
    upload_url: String,
}

impl HttpUploader {
    pub fn new(server_url: &str, upload_path: &str) -> Self {
        Self {
            http: Client::new(),
            upload_url: format!(
                "{}/{}",
                server_url.trim_end_matches('/'),
                upload_path.trim_start_matches('/')
            ),
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        room: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, UploadError> {
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(filename.to_string()))
            .text("room_id", room.to_string());

        let response: UploadResponse = self
            .http
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| UploadError::Request(err.to_string()))?
            .json()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;

        match response {
            UploadResponse {
                status,
                file_url: Some(file_url),
            } if status == "success" => Ok(file_url),
            UploadResponse { status, .. } => Err(UploadError::Rejected(status)),
        }
    }
}
