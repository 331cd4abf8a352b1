use crate::config::TelephonyConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Downloaded call audio.
#[derive(Debug, Clone)]
pub struct RecordingMedia {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl RecordingMedia {
    /// File extension from the content type, else from the source URL.
    pub fn extension(&self, source_url: &str) -> String {
        let from_type = self.content_type.as_deref().and_then(|ct| {
            let ct = ct.split(';').next().unwrap_or_default().trim();
            match ct.to_ascii_lowercase().as_str() {
                "audio/mpeg" | "audio/mp3" => Some("mp3"),
                "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
                "audio/ogg" => Some("ogg"),
                "audio/mp4" | "audio/x-m4a" => Some("m4a"),
                "audio/webm" => Some("webm"),
                _ => None,
            }
        });
        if let Some(ext) = from_type {
            return ext.to_string();
        }
        url::Url::parse(source_url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .and_then(|last| {
                last.rsplit_once('.')
                    .map(|(_, ext)| ext.to_ascii_lowercase())
                    .filter(|ext| !ext.is_empty() && ext.len() <= 4)
            })
            .unwrap_or_else(|| "mp3".to_string())
    }
}

#[async_trait]
pub trait RecordingSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RecordingMedia>;
}

/// Rejects login or error pages served with a 200 status, which the
/// provider returns once the download session has expired.
pub fn ensure_media_response(content_type: Option<&str>, body: &[u8]) -> Result<()> {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("text/html") || ct.contains("application/xhtml") {
            return Err(anyhow!(
                "recording source returned an HTML page ({}) instead of audio",
                ct
            ));
        }
    }
    let head = String::from_utf8_lossy(&body[..body.len().min(64)]).to_ascii_lowercase();
    let head = head.trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Err(anyhow!(
            "recording source returned an HTML document instead of audio"
        ));
    }
    if body.is_empty() {
        return Err(anyhow!("recording source returned an empty body"));
    }
    Ok(())
}

pub struct HttpRecordingSource {
    client: reqwest::Client,
    credentials: Option<(String, Option<String>)>,
}

impl HttpRecordingSource {
    pub fn new(config: &TelephonyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::version::get_useragent())
            .timeout(Duration::from_secs(config.timeout_secs.unwrap_or(60)))
            .build()
            .context("build recording download client")?;
        Ok(Self {
            client,
            credentials: config.credentials(),
        })
    }
}

#[async_trait]
impl RecordingSource for HttpRecordingSource {
    async fn fetch(&self, url: &str) -> Result<RecordingMedia> {
        let mut request = self.client.get(url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_ref());
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("download {}", url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("recording download failed with status {}", status));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        ensure_media_response(content_type.as_deref(), &bytes)?;
        debug!(url, size = bytes.len(), ?content_type, "recording downloaded");
        Ok(RecordingMedia {
            bytes,
            content_type,
        })
    }
}
