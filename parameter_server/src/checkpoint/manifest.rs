use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::Checkpoint;
use crate::storage::BlockValue;

const DIR_PREFIX: &str = "ckpt-";
const BLOB_NAME: &str = "params.bin";
const MANIFEST_NAME: &str = "manifest.json";
const VALUE_SIZE: usize = size_of::<f32>();

/// The completion marker of a checkpoint and the index of its blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub global_step: u64,
    pub created_at_ms: u64,
    /// Size of the blob in bytes.
    pub byte_size: u64,
    pub crc32c: u32,
    pub blocks: Vec<ManifestBlock>,
}

/// Where a block lives inside the blob, `offset` and `len` count values, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestBlock {
    pub id: String,
    pub version: u64,
    pub offset: u64,
    pub len: u64,
}

impl Manifest {
    pub const CURRENT_VERSION: u32 = 1;

    /// The directory holding the checkpoint taken at `step`.
    pub fn dir_name(step: u64) -> String {
        format!("{DIR_PREFIX}{step:012}")
    }

    /// Parses a name produced by `dir_name`, anything else is ignored.
    pub fn parse_dir_name(name: &str) -> Option<u64> {
        let digits = name.strip_prefix(DIR_PREFIX)?;

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        digits.parse().ok()
    }

    pub fn blob_key(step: u64) -> String {
        format!("{}/{BLOB_NAME}", Self::dir_name(step))
    }

    pub fn manifest_key(step: u64) -> String {
        format!("{}/{MANIFEST_NAME}", Self::dir_name(step))
    }

    /// Lays out every block back to back as little endian `f32` values.
    ///
    /// # Arguments
    /// * `checkpoint` - The snapshot to encode.
    ///
    /// # Returns
    /// The manifest describing the blob and the blob itself.
    pub fn encode(checkpoint: &Checkpoint) -> (Self, Vec<u8>) {
        let total: usize = checkpoint.blocks.values().map(BlockValue::len).sum();
        let mut blob = Vec::with_capacity(total * VALUE_SIZE);
        let mut blocks = Vec::with_capacity(checkpoint.blocks.len());
        let mut offset = 0;

        for (id, value) in &checkpoint.blocks {
            blob.extend(value.values().iter().flat_map(|v| v.to_le_bytes()));
            blocks.push(ManifestBlock {
                id: id.clone(),
                version: value.version(),
                offset,
                len: value.len() as u64,
            });
            offset += value.len() as u64;
        }

        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);

        let manifest = Self {
            version: Self::CURRENT_VERSION,
            global_step: checkpoint.global_step,
            created_at_ms,
            byte_size: blob.len() as u64,
            crc32c: crc32c::crc32c(&blob),
            blocks,
        };

        (manifest, blob)
    }

    /// Rebuilds the checkpoint from its blob, checking size, checksum and block bounds.
    ///
    /// # Returns
    /// The checkpoint, or the reason the blob doesn't match this manifest.
    pub fn decode(&self, blob: &[u8]) -> Result<Checkpoint, String> {
        if blob.len() as u64 != self.byte_size {
            return Err(format!(
                "blob has {} bytes, manifest expects {}",
                blob.len(),
                self.byte_size
            ));
        }

        let crc = crc32c::crc32c(blob);
        if crc != self.crc32c {
            return Err(format!(
                "crc32c mismatch, expected {:#010x} got {crc:#010x}",
                self.crc32c
            ));
        }

        if blob.len() % VALUE_SIZE != 0 {
            return Err(format!("blob size {} is not a multiple of {VALUE_SIZE}", blob.len()));
        }

        let values: Vec<f32> = blob
            .chunks_exact(VALUE_SIZE)
            .map(|chunk| {
                let mut bytes = [0; VALUE_SIZE];
                bytes.copy_from_slice(chunk);
                f32::from_le_bytes(bytes)
            })
            .collect();

        let mut blocks = BTreeMap::new();
        for block in &self.blocks {
            let start = block.offset as usize;
            let end = start + block.len as usize;

            let Some(slice) = values.get(start..end) else {
                return Err(format!(
                    "block {:?} spans {start}..{end} past {} values",
                    block.id,
                    values.len()
                ));
            };

            let value = BlockValue::new(slice.to_vec(), block.version);
            if blocks.insert(block.id.clone(), value).is_some() {
                return Err(format!("block {:?} is listed twice", block.id));
            }
        }

        Ok(Checkpoint {
            global_step: self.global_step,
            blocks,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Parses a manifest, rejecting versions this build doesn't know.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

        if manifest.version > Self::CURRENT_VERSION {
            return Err(format!("unsupported manifest version {}", manifest.version));
        }

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        let blocks = [
            ("b".to_string(), BlockValue::new(vec![3.0, 4.0, 5.0], 2)),
            ("a".to_string(), BlockValue::new(vec![-1.5], 9)),
        ];

        Checkpoint {
            global_step: 11,
            blocks: blocks.into_iter().collect(),
        }
    }

    #[test]
    fn test_dir_names() {
        assert_eq!(Manifest::dir_name(40), "ckpt-000000000040");
        assert_eq!(Manifest::parse_dir_name("ckpt-000000000040"), Some(40));
        assert_eq!(Manifest::parse_dir_name("ckpt-"), None);
        assert_eq!(Manifest::parse_dir_name("ckpt-12a"), None);
        assert_eq!(Manifest::parse_dir_name("other"), None);
        assert_eq!(Manifest::manifest_key(7), "ckpt-000000000007/manifest.json");
    }

    #[test]
    fn test_encode_decode() {
        let checkpoint = checkpoint();
        let (manifest, blob) = Manifest::encode(&checkpoint);

        assert_eq!(manifest.byte_size, 16);
        assert_eq!(manifest.blocks[0].id, "a");
        assert_eq!(manifest.blocks[1].offset, 1);

        let json = manifest.to_json().unwrap();
        let parsed = Manifest::from_json(&json).unwrap();
        assert_eq!(parsed.decode(&blob).unwrap(), checkpoint);
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let (manifest, mut blob) = Manifest::encode(&checkpoint());
        blob[5] ^= 0xff;

        let err = manifest.decode(&blob).unwrap_err();
        assert!(err.contains("crc32c"));
    }

    #[test]
    fn test_truncated_blob_is_detected() {
        let (manifest, blob) = Manifest::encode(&checkpoint());
        assert!(manifest.decode(&blob[..8]).is_err());
    }

    #[test]
    fn test_future_version_is_rejected() {
        let (mut manifest, _) = Manifest::encode(&checkpoint());
        manifest.version = Manifest::CURRENT_VERSION + 1;

        let json = manifest.to_json().unwrap();
        assert!(Manifest::from_json(&json).is_err());
    }
}
