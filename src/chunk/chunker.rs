//! Payload fragmenting
//!
//! Encoded payloads are split into fixed-size fragments measured in
//! characters, so a fragment never cuts a multi-byte character in half.
//! Reassembly always orders by index, never by arrival.

use crate::config::ChunkConfig;

/// One fragment of an encoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// 0-based position in the payload
    pub index: usize,
    /// Fragment text
    pub data: String,
}

impl Fragment {
    /// Create a new fragment
    pub fn new(index: usize, data: impl Into<String>) -> Self {
        Fragment {
            index,
            data: data.into(),
        }
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.data.chars().count()
    }

    /// Whether the fragment carries no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits payloads into fixed-size fragments
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a new chunker with the given configuration
    pub fn new(config: &ChunkConfig) -> Self {
        Self::with_size(config.chunk_size)
    }

    /// Create a chunker with a specific fragment size
    pub fn with_size(chunk_size: usize) -> Self {
        Chunker {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Get the configured fragment size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether a payload must be split (longer than one fragment)
    pub fn needs_split(&self, payload: &str) -> bool {
        // Byte length bounds char count from above; skip the count when possible.
        payload.len() > self.chunk_size && payload.chars().count() > self.chunk_size
    }

    /// Number of fragments `payload` splits into
    pub fn fragment_count(&self, payload: &str) -> usize {
        let chars = payload.chars().count();
        chars.div_ceil(self.chunk_size).max(1)
    }

    /// Split a payload into fragments of exactly `chunk_size` characters
    ///
    /// The final fragment may be shorter. An empty payload yields one empty fragment.
    pub fn split(&self, payload: &str) -> Vec<Fragment> {
        if payload.is_empty() {
            return vec![Fragment::new(0, "")];
        }

        // Base64 payloads are ASCII: every byte offset is a char boundary
        if payload.is_ascii() {
            return payload
                .as_bytes()
                .chunks(self.chunk_size)
                .enumerate()
                .map(|(index, bytes)| {
                    let start = index * self.chunk_size;
                    Fragment::new(index, &payload[start..start + bytes.len()])
                })
                .collect();
        }

        let mut fragments = Vec::new();
        let mut start = 0;
        let mut count = 0;

        for (offset, _) in payload.char_indices() {
            if count == self.chunk_size {
                fragments.push(Fragment::new(fragments.len(), &payload[start..offset]));
                start = offset;
                count = 0;
            }
            count += 1;
        }
        fragments.push(Fragment::new(fragments.len(), &payload[start..]));

        fragments
    }

    /// Reassemble fragments into the original payload, ordered by index
    pub fn reassemble(&self, fragments: &[Fragment]) -> String {
        let total_size: usize = fragments.iter().map(|f| f.data.len()).sum();
        let mut result = String::with_capacity(total_size);

        let mut sorted: Vec<_> = fragments.iter().collect();
        sorted.sort_by_key(|f| f.index);

        for fragment in sorted {
            result.push_str(&fragment.data);
        }

        result
    }

    /// BLAKE3 hash of a complete payload
    pub fn payload_hash(&self, payload: &str) -> String {
        blake3::hash(payload.as_bytes()).to_hex().to_string()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chunker() -> Chunker {
        Chunker::with_size(1024)
    }

    #[test]
    fn test_small_payload_single_fragment() {
        let chunker = test_chunker();
        let fragments = chunker.split("Small data");

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].data, "Small data");
        assert!(!chunker.needs_split("Small data"));
    }

    #[test]
    fn test_exact_multiple() {
        let chunker = test_chunker();
        let payload = "a".repeat(3072);

        let fragments = chunker.split(&payload);

        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.len() == 1024));
        assert_eq!(chunker.fragment_count(&payload), 3);
    }

    #[test]
    fn test_remainder_fragment() {
        let chunker = test_chunker();
        let payload = "b".repeat(3000);

        let fragments = chunker.split(&payload);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].len(), 1024);
        assert_eq!(fragments[1].len(), 1024);
        assert_eq!(fragments[2].len(), 952);
        assert_eq!(fragments[2].index, 2);
    }

    #[test]
    fn test_threshold_boundary() {
        let chunker = test_chunker();

        assert!(!chunker.needs_split(&"x".repeat(1024)));
        assert!(chunker.needs_split(&"x".repeat(1025)));
        assert_eq!(chunker.split(&"x".repeat(1025)).len(), 2);
    }

    #[test]
    fn test_split_counts_characters_not_bytes() {
        let chunker = Chunker::with_size(3);
        let payload = "가나다라마";

        let fragments = chunker.split(payload);

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].data, "가나다");
        assert_eq!(fragments[1].data, "라마");
        assert!(!chunker.needs_split("가나다"));
    }

    #[test]
    fn test_empty_payload() {
        let fragments = test_chunker().split("");
        assert_eq!(fragments, vec![Fragment::new(0, "")]);
    }

    #[test]
    fn test_reassemble_unordered() {
        let chunker = test_chunker();
        let payload: String = (0..5000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

        let mut fragments = chunker.split(&payload);
        fragments.reverse();

        assert_eq!(chunker.reassemble(&fragments), payload);
    }

    #[test]
    fn test_payload_hash_deterministic() {
        let chunker = test_chunker();
        let h1 = chunker.payload_hash("data:image/jpeg;base64,AAAA");
        let h2 = chunker.payload_hash("data:image/jpeg;base64,AAAA");
        let h3 = chunker.payload_hash("data:image/jpeg;base64,AAAB");

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }
}
