//! Server row creation with concurrency control.
//!
//! Racing callers for the same `(address, port)` key share one in-flight
//! creation future; a caller that loses the storage-level unique race
//! recovers by re-reading the winner's row.

use crate::repo::{RepoError, Repository, ServerRow};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type PendingCreate = Shared<BoxFuture<'static, Result<ServerRow, RepoError>>>;

#[derive(Clone)]
pub struct ServerOrchestrator<R: Repository> {
    repo: R,
    pending: Arc<Mutex<HashMap<String, PendingCreate>>>,
}

impl<R: Repository> ServerOrchestrator<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn find_or_create(
        &self,
        address: &str,
        port: u16,
        game: &str,
    ) -> Result<ServerRow, RepoError> {
        if let Some(row) = self.repo.find_server_by_addr(address, port).await? {
            return Ok(row);
        }

        let key = format!("{address}:{port}");

        let fut = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| RepoError::Fatal("pending map poisoned".to_string()))?;

            if let Some(existing) = pending.get(&key) {
                existing.clone()
            } else {
                let repo = self.repo.clone();
                let registry = self.pending.clone();
                let address = address.to_string();
                let game = game.to_string();
                let cleanup_key = key.clone();

                let fut: PendingCreate = async move {
                    let result = create_with_race_recovery(&repo, &address, port, &game).await;
                    if let Ok(mut pending) = registry.lock() {
                        pending.remove(&cleanup_key);
                    }
                    result
                }
                .boxed()
                .shared();

                pending.insert(key, fut.clone());
                fut
            }
        };

        fut.await
    }
}

async fn create_with_race_recovery<R: Repository>(
    repo: &R,
    address: &str,
    port: u16,
    game: &str,
) -> Result<ServerRow, RepoError> {
    match repo.find_or_create_server(address, port, game).await {
        Ok(row) => Ok(row),
        Err(RepoError::UniqueViolation(_)) => {
            // Someone else inserted between our lookup and insert; their
            // row is the answer.
            repo.find_server_by_addr(address, port)
                .await?
                .ok_or_else(|| {
                    RepoError::Fatal("unique violation but no row to re-read".to_string())
                })
        }
        Err(err) => Err(err),
    }
}
