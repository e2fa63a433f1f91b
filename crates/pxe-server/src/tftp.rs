//! Read-only TFTP service for the patched iPXE binaries.
//!
//! TFTP is IPv4 only in practice; UEFI HTTP clients fetch the same files
//! from `/tftp/` over HTTP instead.

use crate::error::PxeError;
use async_tftp::server::TftpServerBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TftpServer {
    bind: SocketAddr,
    root: PathBuf,
}

impl TftpServer {
    pub fn new(bind: SocketAddr, root: impl Into<PathBuf>) -> Self {
        Self {
            bind,
            root: root.into(),
        }
    }

    /// Serves `root` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PxeError> {
        let server = TftpServerBuilder::with_dir_ro(&self.root)
            .map_err(|e| PxeError::Tftp(format!("{}: {e}", self.root.display())))?
            .bind(self.bind)
            .build()
            .await
            .map_err(|e| PxeError::Tftp(e.to_string()))?;

        info!(bind = %self.bind, root = %self.root.display(), "TFTP server listening");

        tokio::select! {
            () = cancel.cancelled() => Ok(()),
            r = server.serve() => r.map_err(|e| PxeError::Tftp(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let server = TftpServer::new("127.0.0.1:0".parse().unwrap(), dir.path().join("missing"));
        assert!(matches!(server.run(CancellationToken::new()).await, Err(PxeError::Tftp(_))));
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let server = TftpServer::new("127.0.0.1:0".parse().unwrap(), dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(server.run(cancel).await.is_ok());
    }
}
