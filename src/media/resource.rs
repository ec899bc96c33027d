//! Locally usable resources produced by resolution

use crate::error::FetchError;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use std::sync::Arc;

/// Decoded media bytes with their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime: String,
    pub bytes: Bytes,
}

impl MediaBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A resolved reference, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceHandle {
    /// Passed through untouched (inline payloads and external URLs)
    Url(String),
    /// Reassembled and decoded from the store
    Blob(Arc<MediaBlob>),
}

impl ResourceHandle {
    /// Decoded blob, if this handle carries one
    pub fn blob(&self) -> Option<&MediaBlob> {
        match self {
            ResourceHandle::Blob(blob) => Some(blob),
            ResourceHandle::Url(_) => None,
        }
    }

    /// Approximate memory held by the handle
    pub fn size_hint(&self) -> usize {
        match self {
            ResourceHandle::Url(url) => url.len(),
            ResourceHandle::Blob(blob) => blob.len(),
        }
    }
}

/// Decode a `data:` URI into a blob
///
/// Supports base64 payloads and plain (percent-free) text payloads.
pub fn decode_data_uri(payload: &str) -> Result<MediaBlob, FetchError> {
    let rest = payload
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::Decode("payload is not a data URI".to_string()))?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::Decode("data URI has no ',' separator".to_string()))?;

    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime = if mime.is_empty() { "text/plain" } else { mime };

    let bytes = if is_base64 {
        BASE64
            .decode(data)
            .map_err(|e| FetchError::Decode(format!("invalid base64: {}", e)))?
    } else {
        data.as_bytes().to_vec()
    };

    Ok(MediaBlob {
        mime: mime.to_string(),
        bytes: Bytes::from(bytes),
    })
}
