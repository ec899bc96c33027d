//! Fragment management module
//!
//! Handles splitting encoded payloads into fixed-size fragments,
//! reassembling them by index, and the manifest that declares them.

mod chunker;

pub use chunker::{Chunker, Fragment};

use serde::{Deserialize, Serialize};

/// Upper bound on the fragments a readable manifest may declare
pub const MAX_FRAGMENT_COUNT: usize = 100_000;

/// Upload state recorded on a manifest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    /// Fragments are still being written
    Pending,
    /// Every declared fragment was written
    #[default]
    Complete,
    /// The upload failed and cleanup could not remove it
    Failed,
}

/// Manifest describing the fragments of one chunked media item
///
/// Field names follow the stored document shape. Manifests written before
/// the status field existed deserialize as `Complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    /// Always true; distinguishes manifests from direct records
    pub is_chunked: bool,
    /// Number of fragments stored under `{id}_0 .. {id}_{n-1}`
    #[serde(rename = "chunkCount")]
    pub fragment_count: usize,
    /// Creation time (unix millis)
    pub created_at: i64,
    /// Upload state
    #[serde(default)]
    pub status: ManifestStatus,
    /// Length of the full payload in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_len: Option<usize>,
    /// BLAKE3 hash of the full payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
}

impl ChunkManifest {
    /// Create a pending manifest for a payload split into `fragment_count` pieces
    pub fn pending(fragment_count: usize, payload_len: usize, payload_hash: String) -> Self {
        ChunkManifest {
            is_chunked: true,
            fragment_count,
            created_at: chrono::Utc::now().timestamp_millis(),
            status: ManifestStatus::Pending,
            payload_len: Some(payload_len),
            payload_hash: Some(payload_hash),
        }
    }

    /// Copy of this manifest with a new status
    pub fn with_status(&self, status: ManifestStatus) -> Self {
        ChunkManifest {
            status,
            ..self.clone()
        }
    }

    /// Whether readers may consume the fragments
    pub fn is_complete(&self) -> bool {
        self.status == ManifestStatus::Complete
    }

    /// Reject fragment counts no writer could have produced
    ///
    /// Each fragment holds at least one character, so a manifest recording
    /// its payload length cannot declare more fragments than that.
    pub fn check_fragment_count(&self) -> Result<(), String> {
        if self.fragment_count > MAX_FRAGMENT_COUNT {
            return Err(format!(
                "declares {} fragments (limit {})",
                self.fragment_count, MAX_FRAGMENT_COUNT
            ));
        }
        match self.payload_len {
            Some(len) if self.fragment_count > len => Err(format!(
                "declares {} fragments for a {}-char payload",
                self.fragment_count, len
            )),
            Some(len) if len > 0 && self.fragment_count == 0 => {
                Err(format!("declares no fragments for a {}-char payload", len))
            }
            _ => Ok(()),
        }
    }

    /// Keys of every declared fragment
    pub fn fragment_keys(&self, id: &str) -> Vec<String> {
        (0..self.fragment_count)
            .map(|index| fragment_key(id, index))
            .collect()
    }
}

/// Document key of fragment `index` of media `id`
pub fn fragment_key(id: &str, index: usize) -> String {
    format!("{}_{}", id, index)
}

/// Split a fragment key into its media id and index
pub fn parse_fragment_key(key: &str) -> Option<(&str, usize)> {
    let (id, index) = key.rsplit_once('_')?;
    if id.is_empty() {
        return None;
    }
    index.parse().ok().map(|index| (id, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_manifest_defaults_to_complete() {
        let doc = json!({ "isChunked": true, "chunkCount": 4, "createdAt": 1700000000000i64 });
        let manifest: ChunkManifest = serde_json::from_value(doc).unwrap();

        assert_eq!(manifest.fragment_count, 4);
        assert_eq!(manifest.status, ManifestStatus::Complete);
        assert!(manifest.payload_hash.is_none());
    }

    #[test]
    fn test_manifest_wire_shape() {
        let manifest = ChunkManifest::pending(3, 2_000_000, "abc".to_string());
        let doc = serde_json::to_value(&manifest).unwrap();

        assert_eq!(doc["isChunked"], json!(true));
        assert_eq!(doc["chunkCount"], json!(3));
        assert_eq!(doc["status"], json!("pending"));
        assert_eq!(doc["payloadHash"], json!("abc"));
    }

    #[test]
    fn test_fragment_keys() {
        let manifest = ChunkManifest::pending(3, 10, String::new());
        assert_eq!(manifest.fragment_keys("m1"), vec!["m1_0", "m1_1", "m1_2"]);
    }

    #[test]
    fn test_check_fragment_count() {
        assert!(ChunkManifest::pending(3, 250, String::new()).check_fragment_count().is_ok());
        assert!(ChunkManifest::pending(300, 250, String::new()).check_fragment_count().is_err());
        assert!(ChunkManifest::pending(0, 250, String::new()).check_fragment_count().is_err());

        let doc = json!({ "isChunked": true, "chunkCount": usize::MAX / 2, "createdAt": 0 });
        let legacy: ChunkManifest = serde_json::from_value(doc).unwrap();
        assert!(legacy.check_fragment_count().is_err());
    }

    #[test]
    fn test_parse_fragment_key() {
        assert_eq!(parse_fragment_key("abc_12"), Some(("abc", 12)));
        assert_eq!(parse_fragment_key("a_b_3"), Some(("a_b", 3)));
        assert_eq!(parse_fragment_key("abc"), None);
        assert_eq!(parse_fragment_key("abc_x"), None);
        assert_eq!(parse_fragment_key("_3"), None);
    }
}
