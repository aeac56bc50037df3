use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A compressed, checksummed snapshot of workflow state (spec §3, §4.8).
/// The most recent valid checkpoint plus events-since-seq reconstruct state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub seq: u64,
    pub snapshot: Vec<u8>,
    pub checksum: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn checksum_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl Checkpoint {
    /// Compress `raw` with zstd and checksum the compressed bytes.
    pub fn encode(workflow_id: impl Into<String>, seq: u64, raw: &[u8]) -> std::io::Result<Self> {
        let snapshot = zstd::stream::encode_all(raw, 0)?;
        let checksum = checksum_of(&snapshot);
        Ok(Self {
            workflow_id: workflow_id.into(),
            seq,
            snapshot,
            checksum,
            created_at: chrono::Utc::now(),
        })
    }

    /// Verify the checksum and decompress back to the original bytes
    /// (spec §8 "checkpoint round-trip").
    pub fn decode(&self) -> std::io::Result<Vec<u8>> {
        if checksum_of(&self.snapshot) != self.checksum {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "checkpoint checksum mismatch",
            ));
        }
        zstd::stream::decode_all(self.snapshot.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_bytes() {
        let raw = b"hello checkpoint state".to_vec();
        let checkpoint = Checkpoint::encode("wf-1", 10, &raw).unwrap();
        assert_eq!(checkpoint.decode().unwrap(), raw);
    }

    #[test]
    fn tampered_snapshot_fails_checksum() {
        let raw = b"state".to_vec();
        let mut checkpoint = Checkpoint::encode("wf-1", 1, &raw).unwrap();
        checkpoint.snapshot.push(0xFF);
        assert!(checkpoint.decode().is_err());
    }
}
