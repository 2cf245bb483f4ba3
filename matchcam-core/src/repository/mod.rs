// JSON document repositories
//
// The server keeps its few persistent documents as small JSON files next to
// the binary. Writes go through a temp file + rename so a crash never leaves
// a truncated document behind.

pub mod fingerprint;
pub mod match_state;
pub mod threshold;

pub use fingerprint::FingerprintStore;
pub use match_state::{FileMatchStateStore, MatchStateStore, MemoryMatchStateStore};
pub use threshold::ThresholdStore;

use std::path::Path;

use crate::Result;

/// Atomically replace `path` with `bytes`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
