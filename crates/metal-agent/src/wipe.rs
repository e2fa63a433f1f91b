//! Disk wipe.
//!
//! One task per device; the supervisor awaits every task before returning,
//! so a failing device never leaves siblings running unobserved. The first
//! error is the result.

use crate::error::AgentError;
use crate::inventory::BlockDevice;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Zeroed at each end of a device by a fast wipe.
pub const FAST_WIPE_LEN: u64 = 1 << 20;

const CHUNK_LEN: usize = 4 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMode {
    /// Head and tail only: partition tables and filesystem signatures
    Fast,
    /// Every byte
    Full,
}

impl WipeMode {
    #[must_use]
    pub fn from_insecure(insecure: bool) -> Self {
        if insecure { Self::Fast } else { Self::Full }
    }
}

async fn zero_range(file: &mut tokio::fs::File, start: u64, len: u64, path: &Path) -> Result<(), AgentError> {
    let wipe_err = |source| AgentError::Wipe {
        path: path.to_path_buf(),
        source,
    };

    file.seek(std::io::SeekFrom::Start(start)).await.map_err(wipe_err)?;
    let zeros = vec![0u8; CHUNK_LEN];
    let mut remaining = len;
    while remaining > 0 {
        let n = usize::try_from(remaining).map_or(CHUNK_LEN, |r| r.min(CHUNK_LEN));
        file.write_all(&zeros[..n]).await.map_err(wipe_err)?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Wipes one device of `size` bytes.
pub async fn wipe_device(path: &Path, size: u64, mode: WipeMode) -> Result<(), AgentError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|source| AgentError::Wipe {
            path: path.to_path_buf(),
            source,
        })?;

    match mode {
        WipeMode::Fast => {
            let head = size.min(FAST_WIPE_LEN);
            zero_range(&mut file, 0, head, path).await?;
            if size > FAST_WIPE_LEN {
                let tail_start = (size - FAST_WIPE_LEN).max(head);
                zero_range(&mut file, tail_start, size - tail_start, path).await?;
            }
        }
        WipeMode::Full => zero_range(&mut file, 0, size, path).await?,
    }

    file.sync_all().await.map_err(|source| AgentError::Wipe {
        path: path.to_path_buf(),
        source,
    })
}

/// Wipes every writable device concurrently.
pub async fn wipe_all(devices: &[BlockDevice], mode: WipeMode) -> Result<(), AgentError> {
    let mut tasks: JoinSet<Result<PathBuf, AgentError>> = JoinSet::new();

    for device in devices {
        if device.read_only {
            info!(device = %device.path.display(), "skipping read-only disk");
            continue;
        }

        let path = device.path.clone();
        let size = device.size;
        tasks.spawn(async move {
            info!(device = %path.display(), ?mode, "resetting");
            wipe_device(&path, size, mode).await?;
            Ok(path)
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| AgentError::WipeTask(e.to_string())).and_then(|r| r);
        match result {
            Ok(path) => info!(device = %path.display(), ?mode, "wiped"),
            Err(e) => {
                warn!(error = %e, "disk wipe failed");
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}
