//! Periodic `status` scraping.
//!
//! Every sweep picks the servers that have RCON credentials and have been
//! heard from within the active window, asks each for `status`, and feeds
//! the parsed snapshot back into the pipeline as a synthetic ServerStatus
//! event. Everything here is best-effort: a failing server is logged and
//! skipped, never fatal.

use crate::crypto::CredentialCipher;
use crate::pipeline::PipelineHandle;
use crate::repo::{Repository, ServerRow};
use events::{Event, EventKind};
use rcon::{Endpoint, RconPool};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StatusScraper<R: Repository> {
    repo: R,
    pool: RconPool,
    pipeline: PipelineHandle,
    cipher: Option<Arc<CredentialCipher>>,
    interval: Duration,
    active_window: Duration,
}

impl<R: Repository> StatusScraper<R> {
    pub fn new(
        repo: R,
        pool: RconPool,
        pipeline: PipelineHandle,
        cipher: Option<Arc<CredentialCipher>>,
        interval: Duration,
        active_window: Duration,
    ) -> Self {
        Self {
            repo,
            pool,
            pipeline,
            cipher,
            interval,
            active_window,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.sweep().await;
        }

        info!("status scraper stopped");
    }

    async fn sweep(&self) {
        let servers = match self.repo.list_servers().await {
            Ok(servers) => servers,
            Err(err) => {
                warn!(%err, "status sweep could not list servers");
                return;
            }
        };

        let now = OffsetDateTime::now_utc();

        for server in servers {
            if !self.eligible(&server, now) {
                continue;
            }

            if let Err(err) = self.scrape_one(&server).await {
                warn!(server_id = server.server_id, %err, "status scrape failed");
            }
        }
    }

    fn eligible(&self, server: &ServerRow, now: OffsetDateTime) -> bool {
        if server.rcon_sealed.is_none() {
            return false;
        }

        let Some(last_event) = server.last_event else {
            return false;
        };

        let age = now - last_event;
        age >= time::Duration::ZERO && age <= self.active_window
    }

    async fn scrape_one(&self, server: &ServerRow) -> Result<(), String> {
        let sealed = server
            .rcon_sealed
            .as_deref()
            .ok_or_else(|| "no credential".to_string())?;

        let Some(cipher) = &self.cipher else {
            debug!(
                server_id = server.server_id,
                "no encryption key configured, skipping scrape"
            );
            return Ok(());
        };

        let password = cipher
            .open(sealed)
            .map_err(|err| format!("credential unseal failed: {err}"))?;

        let ip: IpAddr = server
            .address
            .parse()
            .map_err(|_| format!("bad server address {}", server.address))?;

        self.pool
            .configure(
                server.server_id,
                Endpoint {
                    kind: server.engine,
                    addr: SocketAddr::new(ip, server.port),
                    password,
                },
            )
            .await;

        let text = self
            .pool
            .get_status(server.server_id)
            .await
            .map_err(|err| err.to_string())?;

        let snapshot = events::status::parse(&text);

        let now = OffsetDateTime::now_utc();
        let event = Event::new(
            server.server_id,
            PrimitiveDateTime::new(now.date(), now.time()),
            EventKind::ServerStatus(snapshot),
        );

        self.pipeline
            .submit(event)
            .await
            .map_err(|err| err.to_string())
    }
}
