//! Content fingerprinting.
//!
//! A file's `content_id` is the SHA-256 of its bytes, so a moved or copied
//! bag keeps its identity. Fingerprinting also extracts the bag's structural
//! metadata; both are pure functions of the file contents and run on the
//! blocking thread pool so many files can be processed at once.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use bag_catalog_core::models::BagMetadata;

use crate::bag::BagParser;
use crate::error::BagError;
use crate::status::{StatusEvent, StatusSink};

const HASH_BLOCK: usize = 64 * 1024;

/// Identity and metadata of one bag file.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub content_id: String,
    pub size: u64,
    pub metadata: BagMetadata,
}

/// Hex SHA-256 of a file's contents and its length in bytes.
pub fn content_id(path: &Path) -> Result<(String, u64), BagError> {
    let mut reader = BufReader::with_capacity(HASH_BLOCK, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

pub fn fingerprint(parser: &dyn BagParser, path: &Path) -> Result<Fingerprint, BagError> {
    let (content_id, size) = content_id(path)?;
    debug!(path = %path.display(), %content_id, "calculated content id");
    let metadata = parser.read_metadata(path)?;
    Ok(Fingerprint {
        content_id,
        size,
        metadata,
    })
}

/// Fingerprint on the blocking pool, reporting a `Working` heartbeat every
/// `every` until it finishes. The first heartbeat is sent immediately.
pub async fn fingerprint_with_heartbeat(
    parser: Arc<dyn BagParser>,
    path: PathBuf,
    every: Duration,
    status: Arc<dyn StatusSink>,
) -> Result<Fingerprint, BagError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut task = tokio::task::spawn_blocking(move || fingerprint(parser.as_ref(), &path));
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            joined = &mut task => {
                return joined.map_err(|e| BagError::Unreadable(std::io::Error::other(e)))?;
            }
            _ = ticker.tick() => {
                status.report(StatusEvent::Working(format!("Fingerprinting {}...", name)));
            }
        }
    }
}
