use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;
use std::path::Path;

pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// An image payload as exchanged with the generative backend: a mime type
/// plus the decoded bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn from_base64(mime_type: &str, encoded: &str) -> Result<Self> {
        let data = BASE64
            .decode(encoded.trim().as_bytes())
            .context("image base64 decode failed")?;
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME_TYPE
        } else {
            mime_type.trim()
        };
        Ok(Self::new(mime_type, data))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// File extension matching the mime type, `bin` when unknown.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

/// Parses `data:<mime>;base64,<payload>`. A bare base64 string is accepted
/// too and assumed to be PNG.
pub fn parse_data_url(input: &str) -> Result<InlineImage> {
    let input = input.trim();
    match input.strip_prefix("data:") {
        Some(rest) => {
            let (mime_type, payload) = rest
                .split_once(";base64,")
                .ok_or_else(|| anyhow!("data URL is not base64 encoded"))?;
            InlineImage::from_base64(mime_type, payload)
        }
        None => InlineImage::from_base64(DEFAULT_MIME_TYPE, input),
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Reads an image from disk. Files holding a `data:` URL (as saved by a
/// browser) are decoded.
pub async fn load_image_file(path: &Path) -> Result<InlineImage> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed reading {}", path.display()))?;
    if data.starts_with(b"data:") {
        let text = String::from_utf8(data).context("data URL is not valid UTF-8")?;
        return parse_data_url(&text);
    }
    let mime_type = mime_for_path(path).unwrap_or("image/jpeg");
    Ok(InlineImage::new(mime_type, data))
}
