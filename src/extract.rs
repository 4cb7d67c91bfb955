use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::response::ResponseValue;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "dental-scan-api/0.1";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Field names probed, in order, before a mapping is scanned in full.
pub const PRIORITY_KEYS: &[&str] = &[
    "image",
    "output",
    "result",
    "annotated",
    "visualization",
    "preview",
    "rendered",
];

/// Text must be strictly longer than this to count as bare base64.
const BASE64_MIN_LEN: usize = 200;
/// Only this many leading characters are checked against the base64 alphabet.
const BASE64_PROBE_LEN: usize = 1000;

/// Accepts payloads with or without trailing `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Lazy static regexes ──────────────────────────────────────────────────────

static DATA_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:image/[\w.+-]+;base64,(.+)$").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("no image-like field found in response")]
    NotFound,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not fetch image: {0}")]
    Transport(String),
    #[error("could not write image: {0}")]
    Write(#[from] std::io::Error),
}

// ── Search result types ──────────────────────────────────────────────────────

/// Where the image bytes come from, borrowed from the response tree.
#[derive(Debug)]
pub enum ImageSource<'a> {
    RemoteUrl(&'a str),
    DataUri(&'a str),
    Base64Text(&'a str),
    RawBytes(&'a [u8]),
    DecodedBitmap(&'a DynamicImage),
}

impl ImageSource<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::RemoteUrl(_) => "remote-url",
            ImageSource::DataUri(_) => "data-uri",
            ImageSource::Base64Text(_) => "base64",
            ImageSource::RawBytes(_) => "bytes",
            ImageSource::DecodedBitmap(_) => "bitmap",
        }
    }
}

/// First image-like node found in a response, with its location
/// (`outputs[0].visualization`).
#[derive(Debug)]
pub struct ImageRef<'a> {
    pub source: ImageSource<'a>,
    pub path: String,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Locate an image in `response`, decode it and write it to `output_path`.
///
/// Every failure is logged and collapsed into `None`; nothing at
/// `output_path` is touched unless decoded bytes are ready to be written.
pub fn extract_image(response: &ResponseValue, output_path: impl AsRef<Path>) -> Option<PathBuf> {
    match try_extract_image(response, output_path) {
        Ok(path) => Some(path),
        Err(ExtractionError::NotFound) => {
            tracing::warn!("no image-like field found in detection result");
            None
        }
        Err(e) => {
            tracing::warn!("failed saving image: {}", e);
            None
        }
    }
}

/// Same as [`extract_image`] but keeps the failure kind, so callers can tell a
/// broken environment (`Write`) from an unexpected response shape.
pub fn try_extract_image(
    response: &ResponseValue,
    output_path: impl AsRef<Path>,
) -> Result<PathBuf, ExtractionError> {
    let output_path = output_path.as_ref();
    save_extracted_image(response, output_path)?;
    Ok(output_path.to_path_buf())
}

/// Like [`try_extract_image`], returning the bytes that were written so the
/// caller never has to read back a path other writers may replace.
pub fn save_extracted_image(
    response: &ResponseValue,
    output_path: impl AsRef<Path>,
) -> Result<Vec<u8>, ExtractionError> {
    let output_path = output_path.as_ref();
    let found = find_image(response).ok_or(ExtractionError::NotFound)?;
    tracing::info!("found image at path: {}, type: {}", found.path, found.source.kind());

    let bytes = materialize(&found.source, output_path)?;
    write_atomic(output_path, &bytes)?;
    tracing::info!("saved output image to {} ({} bytes)", output_path.display(), bytes.len());
    Ok(bytes)
}

/// Depth-first search for the first image-like node.
pub fn find_image(value: &ResponseValue) -> Option<ImageRef<'_>> {
    find_at(value, String::new())
}

// ── Tree search ──────────────────────────────────────────────────────────────

fn find_at(value: &ResponseValue, path: String) -> Option<ImageRef<'_>> {
    let source = match value {
        ResponseValue::Bytes(bytes) => Some(ImageSource::RawBytes(bytes)),
        ResponseValue::Bitmap(img) => Some(ImageSource::DecodedBitmap(img)),
        ResponseValue::Text(text) => classify_text(text),
        ResponseValue::Map(pairs) => return find_in_map(pairs, &path),
        ResponseValue::Seq(items) => {
            return items
                .iter()
                .enumerate()
                .find_map(|(i, item)| find_at(item, format!("{}[{}]", path, i)));
        }
        ResponseValue::Number(_) | ResponseValue::Bool(_) | ResponseValue::Null => None,
    };
    source.map(|source| ImageRef { source, path })
}

fn find_in_map<'a>(pairs: &'a [(String, ResponseValue)], path: &str) -> Option<ImageRef<'a>> {
    for key in PRIORITY_KEYS {
        if let Some((k, v)) = pairs.iter().find(|(k, _)| k.as_str() == *key) {
            if let Some(found) = find_at(v, child_path(path, k)) {
                return Some(found);
            }
        }
    }

    pairs
        .iter()
        .find_map(|(k, v)| find_at(v, child_path(path, k)))
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn classify_text(text: &str) -> Option<ImageSource<'_>> {
    if text.starts_with("http://") || text.starts_with("https://") {
        Some(ImageSource::RemoteUrl(text))
    } else if text.starts_with("data:image/") {
        Some(ImageSource::DataUri(text))
    } else if looks_like_base64(text) {
        Some(ImageSource::Base64Text(text))
    } else {
        None
    }
}

fn looks_like_base64(text: &str) -> bool {
    text.chars().count() > BASE64_MIN_LEN
        && text
            .chars()
            .take(BASE64_PROBE_LEN)
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '\n' | '\r'))
}

// ── Materialization ──────────────────────────────────────────────────────────

fn materialize(source: &ImageSource<'_>, output_path: &Path) -> Result<Vec<u8>, ExtractionError> {
    match *source {
        ImageSource::RemoteUrl(url) => fetch_bytes(url),
        ImageSource::DataUri(uri) => {
            let payload = DATA_URI_RE
                .captures(uri)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or(uri);
            decode_base64(payload)
        }
        ImageSource::Base64Text(text) => decode_base64(text),
        ImageSource::RawBytes(bytes) => Ok(bytes.to_vec()),
        ImageSource::DecodedBitmap(img) => encode_bitmap(img, output_path),
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, ExtractionError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT_BASE64
        .decode(compact.as_bytes())
        .map_err(|e| ExtractionError::Decode(format!("invalid base64: {}", e)))
}

fn encode_bitmap(img: &DynamicImage, output_path: &Path) -> Result<Vec<u8>, ExtractionError> {
    let format = ImageFormat::from_path(output_path).map_err(|e| {
        ExtractionError::Decode(format!(
            "cannot pick an encoding for {}: {}",
            output_path.display(),
            e
        ))
    })?;
    let mut buf = Cursor::new(Vec::new());
    let written = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut buf, format),
        _ => img.write_to(&mut buf, format),
    };
    written.map_err(|e| ExtractionError::Decode(format!("bitmap encode failed: {}", e)))?;
    Ok(buf.into_inner())
}

fn fetch_bytes(url: &str) -> Result<Vec<u8>, ExtractionError> {
    let parsed = Url::parse(url).map_err(|e| ExtractionError::Transport(format!("invalid URL: {}", e)))?;

    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ExtractionError::Transport(e.to_string()))?;

    let response = client.get(parsed).send().map_err(|e| {
        if e.is_timeout() {
            ExtractionError::Transport(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            ExtractionError::Transport(format!("ConnectError: {}", e))
        } else {
            ExtractionError::Transport(format!("RequestError: {}", e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::Transport(format!("upstream returned {}", status)));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| ExtractionError::Transport(e.to_string()))
}

// ── Output ───────────────────────────────────────────────────────────────────

/// Write to a sibling temp file, then rename over `path` so readers never see
/// a partially written image.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
