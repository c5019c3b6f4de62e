//! Cover art retrieval for `mpris:artUrl`.
//!
//! The URL scheme decides the transport: `file://` reads from disk, `data:`
//! decodes inline payloads, anything else is fetched over HTTP. Every failure
//! leaves the track without art.

use crate::http::http_client;
use crate::mpris::metadata::Metadata;
use crate::palette::{self, Palette};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::Mutex;

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtData {
    /// Raw image bytes, base64 encoded on the wire.
    #[serde(serialize_with = "as_base64")]
    pub data: Vec<u8>,
    #[serde(rename = "type")]
    pub mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette: Option<Palette>,
}

fn as_base64<S: serde::Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

#[derive(thiserror::Error, Debug)]
pub enum ArtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("Malformed art URL: {0}")]
    Malformed(String),
}

/// Resolves art references and remembers the outcome for the last URL, so
/// repeated updates for the same track neither refetch nor retry a failure.
#[derive(Default)]
pub struct ArtResolver {
    last: Mutex<Option<(String, Option<ArtData>)>>,
}

impl ArtResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in `metadata.art` from `metadata.art_url`, if possible.
    pub async fn attach(&self, mut metadata: Metadata) -> Metadata {
        if let Some(url) = metadata.art_url.as_deref() {
            metadata.art = self.resolve(url).await;
        }
        metadata
    }

    pub async fn resolve(&self, url: &str) -> Option<ArtData> {
        if let Some((last_url, art)) = self.last.lock().await.as_ref()
            && last_url == url
        {
            return art.clone();
        }
        let art = load(url).await;
        *self.last.lock().await = Some((url.to_string(), art.clone()));
        art
    }
}

async fn load(url: &str) -> Option<ArtData> {
    let (data, mime) = match fetch(url).await {
        Ok(fetched) => fetched,
        Err(e) => {
            tracing::debug!(url, error = %e, "Cover art retrieval failed");
            return None;
        }
    };

    let bytes = data.clone();
    let palette = match tokio::task::spawn_blocking(move || palette::extract(&bytes)).await {
        Ok(Ok(p)) => Some(p),
        Ok(Err(e)) => {
            tracing::debug!(url, error = %e, "Couldn't compute palette for image");
            None
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "Palette task failed");
            None
        }
    };
    Some(ArtData { data, mime, palette })
}

async fn fetch(url: &str) -> Result<(Vec<u8>, String), ArtError> {
    if let Some(rest) = url.strip_prefix("file://") {
        let path = file_url_path(rest)?;
        let mime = mime_from_path(&path);
        let data = tokio::fs::read(&path).await?;
        Ok((data, mime))
    } else if let Some(rest) = url.strip_prefix("data:") {
        decode_data_url(rest)
    } else {
        fetch_http(url).await
    }
}

fn file_url_path(rest: &str) -> Result<PathBuf, ArtError> {
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    if !rest.starts_with('/') {
        return Err(ArtError::Malformed(format!("file://{rest}")));
    }
    let decoded = urlencoding::decode(rest).map_err(|e| ArtError::Malformed(e.to_string()))?;
    Ok(PathBuf::from(decoded.into_owned()))
}

fn mime_from_path(path: &std::path::Path) -> String {
    image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_MIME.to_string())
}

/// Decode the part of a `data:` URL after the scheme.
fn decode_data_url(rest: &str) -> Result<(Vec<u8>, String), ArtError> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ArtError::Malformed("data URL without payload".to_string()))?;
    let mut params = header.split(';');
    let mime = params
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or(FALLBACK_MIME)
        .to_string();
    let data = if params.any(|p| p.eq_ignore_ascii_case("base64")) {
        STANDARD.decode(payload.trim())?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    Ok((data, mime))
}

async fn fetch_http(url: &str) -> Result<(Vec<u8>, String), ArtError> {
    let resp = http_client().get(url).send().await?;
    if !resp.status().is_success() {
        return Err(ArtError::Status(resp.status()));
    }
    let mime = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(FALLBACK_MIME)
        .to_string();
    let data = resp.bytes().await?.to_vec();
    Ok((data, mime))
}
