//! Read-modify-write helpers retrying on version conflicts.

use crate::error::StoreError;
use crate::store_trait::MetalStore;
use crds::Server;
use tracing::debug;

/// Attempts made before a conflict is returned to the caller.
pub const MAX_CONFLICT_RETRIES: usize = 5;

/// Fetches `name`, applies `mutate` to it and writes the status back.
///
/// `mutate` returns `false` when nothing changed, in which case no write is
/// issued. Returns the stored server, or `None` if it does not exist.
pub async fn update_server_status<F>(
    store: &dyn MetalStore,
    name: &str,
    mut mutate: F,
) -> Result<Option<Server>, StoreError>
where
    F: FnMut(&mut Server) -> bool + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut server) = store.get_server(name).await? else {
            return Ok(None);
        };

        if !mutate(&mut server) {
            return Ok(Some(server));
        }

        match store.replace_server_status(&server).await {
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!(server = name, attempt, "status update conflicted, retrying");
            }
            other => return other.map(Some),
        }
    }
}

/// Same as [`update_server_status`] for metadata and spec.
pub async fn update_server<F>(store: &dyn MetalStore, name: &str, mut mutate: F) -> Result<Option<Server>, StoreError>
where
    F: FnMut(&mut Server) -> bool + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut server) = store.get_server(name).await? else {
            return Ok(None);
        };

        if !mutate(&mut server) {
            return Ok(Some(server));
        }

        match store.replace_server(&server).await {
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!(server = name, attempt, "update conflicted, retrying");
            }
            other => return other.map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crds::ServerSpec;

    #[tokio::test]
    async fn test_no_change_skips_write() {
        let store = MemoryStore::new();
        store.insert_server(Server::new("abc", ServerSpec::default()));
        let before = store.get_server("abc").await.unwrap().unwrap();

        let after = update_server_status(&store, "abc", |_| false).await.unwrap().unwrap();
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_missing_server_is_none() {
        let store = MemoryStore::new();
        assert!(update_server(&store, "nope", |_| true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_update_applies() {
        let store = MemoryStore::new();
        store.insert_server(Server::new("abc", ServerSpec::default()));

        update_server_status(&store, "abc", |s| {
            s.status_mut().is_clean = true;
            true
        })
        .await
        .unwrap();

        let stored = store.get_server("abc").await.unwrap().unwrap();
        assert!(stored.status.unwrap().is_clean);
    }
}
