//! Connection pool: one live RCON session per server id.
//!
//! Racing callers for the same server are collapsed onto a single connect
//! attempt through a registry of shared futures; everyone awaits the same
//! outcome. Connect failures retry with exponential back-off before
//! surfacing as `ConnectionFailed`.

use crate::connection::{ConnectOptions, RconConnection};
use crate::{EngineKind, RconError};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Where and how to reach one server's remote console.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub kind: EngineKind,
    pub addr: SocketAddr,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub options: ConnectOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(5000),
            options: ConnectOptions::default(),
        }
    }
}

type SharedConnect = Shared<BoxFuture<'static, Result<(), RconError>>>;

#[derive(Clone)]
pub struct RconPool {
    inner: Arc<Inner>,
}

struct Inner {
    config: PoolConfig,
    endpoints: StdMutex<HashMap<u64, Endpoint>>,
    connections: Mutex<HashMap<u64, Arc<Mutex<RconConnection>>>>,
    pending: StdMutex<HashMap<u64, SharedConnect>>,
}

impl RconPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                endpoints: StdMutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                pending: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers or replaces a server's RCON endpoint. A changed endpoint
    /// drops any existing session so the next command dials the new one.
    pub async fn configure(&self, server_id: u64, endpoint: Endpoint) {
        let changed = {
            let mut endpoints = self.inner.endpoints.lock().expect("endpoint lock");
            let changed = endpoints
                .get(&server_id)
                .is_some_and(|old| old.addr != endpoint.addr || old.password != endpoint.password);
            endpoints.insert(server_id, endpoint);
            changed
        };

        if changed {
            if let Some(conn) = self.inner.connections.lock().await.remove(&server_id) {
                conn.lock().await.disconnect();
            }
        }
    }

    pub fn has_endpoint(&self, server_id: u64) -> bool {
        self.inner
            .endpoints
            .lock()
            .expect("endpoint lock")
            .contains_key(&server_id)
    }

    pub async fn execute(&self, server_id: u64, command: &str) -> Result<String, RconError> {
        let conn = self.connection(server_id).await?;

        let needs_connect = !conn.lock().await.is_connected();
        if needs_connect {
            self.connect_deduplicated(server_id, conn.clone()).await?;
        }

        let mut guard = conn.lock().await;
        // The session may have dropped between the pending connect and our
        // lock; one direct reconnect keeps the contract that execute runs
        // against a live session or reports why not.
        guard.ensure_ready().await?;
        guard.execute(command).await
    }

    pub async fn get_status(&self, server_id: u64) -> Result<String, RconError> {
        self.execute(server_id, "status").await
    }

    pub async fn disconnect_all(&self) {
        let mut connections = self.inner.connections.lock().await;

        for (server_id, conn) in connections.drain() {
            conn.lock().await.disconnect();
            debug!(server_id, "rcon session closed");
        }
    }

    async fn connection(&self, server_id: u64) -> Result<Arc<Mutex<RconConnection>>, RconError> {
        let mut connections = self.inner.connections.lock().await;

        if let Some(conn) = connections.get(&server_id) {
            return Ok(conn.clone());
        }

        let endpoint = self
            .inner
            .endpoints
            .lock()
            .expect("endpoint lock")
            .get(&server_id)
            .cloned()
            .ok_or_else(|| {
                RconError::ConnectionFailed(format!("no rcon endpoint for server {server_id}"))
            })?;

        let conn = Arc::new(Mutex::new(RconConnection::new(
            endpoint.kind,
            endpoint.addr,
            endpoint.password,
            self.inner.config.options.clone(),
        )));
        connections.insert(server_id, conn.clone());

        Ok(conn)
    }

    /// At most one connect attempt runs per server id; racing callers await
    /// the same shared future.
    async fn connect_deduplicated(
        &self,
        server_id: u64,
        conn: Arc<Mutex<RconConnection>>,
    ) -> Result<(), RconError> {
        let fut = {
            let mut pending = self.inner.pending.lock().expect("pending lock");

            if let Some(existing) = pending.get(&server_id) {
                existing.clone()
            } else {
                let config = self.inner.config.clone();
                let inner = self.inner.clone();

                let fut: SharedConnect = async move {
                    let result = connect_with_backoff(&config, server_id, conn).await;
                    inner
                        .pending
                        .lock()
                        .expect("pending lock")
                        .remove(&server_id);
                    result
                }
                .boxed()
                .shared();

                pending.insert(server_id, fut.clone());
                fut
            }
        };

        fut.await
    }
}

async fn connect_with_backoff(
    config: &PoolConfig,
    server_id: u64,
    conn: Arc<Mutex<RconConnection>>,
) -> Result<(), RconError> {
    let mut attempt = 1u32;

    loop {
        let mut guard = conn.lock().await;

        // A caller may race in after an earlier connect already succeeded;
        // dialing again would tear down the live session.
        if guard.is_connected() {
            return Ok(());
        }

        let err = match guard.connect().await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        drop(guard);

        // A rejected password will not get better by retrying.
        if err == RconError::InvalidCredentials {
            return Err(err);
        }

        if attempt >= config.max_retries {
            return Err(RconError::ConnectionFailed(format!(
                "server {server_id}: giving up after {attempt} attempts: {err}"
            )));
        }

        let delay = backoff_delay(config, attempt);
        warn!(server_id, attempt, ?delay, %err, "rcon connect failed, backing off");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// `min(base · 2^(n−1), cap)` for attempt `n`.
fn backoff_delay(config: &PoolConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    config
        .backoff_base
        .saturating_mul(factor)
        .min(config.backoff_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::UdpSocket;

    #[test]
    fn backoff_doubles_then_caps() {
        let config = PoolConfig::default();

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(5000));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(5000));
    }

    /// GoldSrc server double that answers every challenge and echoes every
    /// command, counting the challenges it hands out.
    async fn spawn_echo_server(connects: Arc<AtomicUsize>) -> SocketAddr {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];

            loop {
                let Ok((n, peer)) = server.recv_from(&mut buf).await else {
                    break;
                };

                let request = String::from_utf8_lossy(&buf[4..n]).to_string();

                if request.starts_with("challenge rcon") {
                    connects.fetch_add(1, Ordering::SeqCst);
                    server
                        .send_to(b"\xff\xff\xff\xffchallenge rcon 424242\n", peer)
                        .await
                        .unwrap();
                } else {
                    let mut reply = vec![0xFF; 4];
                    reply.push(b'l');
                    reply.extend_from_slice(request.trim_end().as_bytes());
                    server.send_to(&reply, peer).await.unwrap();
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_connect() {
        let connects = Arc::new(AtomicUsize::new(0));
        let addr = spawn_echo_server(connects.clone()).await;

        let pool = RconPool::new(PoolConfig::default());
        pool.configure(
            1,
            Endpoint {
                kind: EngineKind::GoldSrc,
                addr,
                password: "secret".to_string(),
            },
        )
        .await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(
                async move { pool.get_status(1).await },
            ));
        }

        for task in tasks {
            let body = task.await.unwrap().unwrap();
            assert!(body.starts_with("rcon 424242 secret status"));
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_server_is_a_connection_failure() {
        let pool = RconPool::new(PoolConfig::default());

        assert!(matches!(
            pool.execute(99, "status").await,
            Err(RconError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_all_empties_the_pool() {
        let connects = Arc::new(AtomicUsize::new(0));
        let addr = spawn_echo_server(connects.clone()).await;

        let pool = RconPool::new(PoolConfig::default());
        pool.configure(
            1,
            Endpoint {
                kind: EngineKind::GoldSrc,
                addr,
                password: "secret".to_string(),
            },
        )
        .await;

        pool.get_status(1).await.unwrap();
        pool.disconnect_all().await;

        assert!(pool.inner.connections.lock().await.is_empty());

        // The pool reconnects lazily on the next command.
        pool.get_status(1).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }
}
