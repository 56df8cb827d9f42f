//! Test fixtures for generating test data.

use upvault_core::UploadMetadata;

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// Encode an `Upload-Metadata` header from key/value pairs.
#[allow(dead_code)]
pub fn metadata_header(pairs: &[(&str, &str)]) -> String {
    let mut metadata = UploadMetadata::new();
    for (key, value) in pairs {
        metadata.insert(*key, *value);
    }
    metadata.to_header()
}

/// Unique email for tests sharing a database.
#[allow(dead_code)]
pub fn unique_email(name: &str) -> String {
    format!("{name}-{}@example.com", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_metadata_header_round_trips() {
        let header = metadata_header(&[("filename", "report.pdf")]);
        let parsed = UploadMetadata::parse(&header).unwrap();
        assert_eq!(parsed.filename(), Some("report.pdf"));
    }
}
