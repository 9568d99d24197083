//! UDP log ingress.
//!
//! One task owns the socket. Each datagram is one log line (UTF-8 with
//! lossy fallback, since GoldSrc servers happily emit Latin-1 names) or a
//! beacon token. Sources authenticate either by a known `(address, port)`
//! pair or by a previously verified beacon; everything else is dropped,
//! counted, and logged at a rate limit.

use crate::auth;
use crate::metrics::Metrics;
use crate::orchestrator::ServerOrchestrator;
use crate::pipeline::PipelineHandle;
use crate::repo::{Repository, ServerId};
use events::{LogParser, ParseError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const UNKNOWN_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct IngressConfig {
    /// Game code assumed when auto-registering unknown pairs.
    pub default_game: String,
    pub auto_register: bool,
}

pub struct Ingress<R: Repository> {
    socket: UdpSocket,
    repo: R,
    orchestrator: ServerOrchestrator<R>,
    pipeline: PipelineHandle,
    parser: LogParser,
    metrics: Arc<Metrics>,
    config: IngressConfig,
    /// Authenticated source address -> server id.
    bindings: Mutex<HashMap<SocketAddr, ServerId>>,
    unknown_log: Mutex<HashMap<SocketAddr, Instant>>,
}

impl<R: Repository> Ingress<R> {
    pub async fn bind(
        addr: SocketAddr,
        repo: R,
        orchestrator: ServerOrchestrator<R>,
        pipeline: PipelineHandle,
        metrics: Arc<Metrics>,
        config: IngressConfig,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "log ingress listening");

        Ok(Self {
            socket,
            repo,
            orchestrator,
            pipeline,
            parser: LogParser::new(),
            metrics,
            config,
            bindings: Mutex::new(HashMap::new()),
            unknown_log: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; 65_535];

        loop {
            let (len, peer) = tokio::select! {
                () = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(%err, "ingress receive error");
                        continue;
                    }
                },
            };

            if self.handle_datagram(peer, &buf[..len]).await.is_err() {
                // Pipeline shut down under us.
                break;
            }
        }

        info!("log ingress stopped");
    }

    /// Err means the pipeline is gone and ingress should stop.
    async fn handle_datagram(&self, peer: SocketAddr, datagram: &[u8]) -> Result<(), ()> {
        Metrics::bump(&self.metrics.lines_received);

        let line = String::from_utf8_lossy(datagram);
        let line = line.trim_end_matches(['\r', '\n', '\0']).trim_start_matches('\u{feff}');

        if auth::looks_like_token(line) {
            self.handle_beacon(peer, line).await;
            return Ok(());
        }

        if !self.parser.can_parse(line) {
            // No engine timestamp prefix: dropped silently.
            Metrics::bump(&self.metrics.parse_malformed);
            return Ok(());
        }

        let Some(server_id) = self.resolve(peer).await else {
            Metrics::bump(&self.metrics.unknown_sources);
            if self.should_log_unknown(peer) {
                warn!(%peer, "dropping log lines from unauthenticated source");
            }
            return Ok(());
        };

        match self.parser.parse(line, server_id) {
            Ok(event) => self.pipeline.submit(event).await.map_err(|_| ()),
            Err(ParseError::UnsupportedLine) => {
                Metrics::bump(&self.metrics.parse_unsupported);
                debug!(server_id, line, "unsupported log line");
                Ok(())
            }
            Err(ParseError::Malformed) => {
                Metrics::bump(&self.metrics.parse_malformed);
                Ok(())
            }
        }
    }

    async fn resolve(&self, peer: SocketAddr) -> Option<ServerId> {
        if let Ok(bindings) = self.bindings.lock()
            && let Some(server_id) = bindings.get(&peer)
        {
            return Some(*server_id);
        }

        let address = peer.ip().to_string();

        let row = match self.repo.find_server_by_addr(&address, peer.port()).await {
            Ok(Some(row)) => Some(row),
            Ok(None) if self.config.auto_register => self
                .orchestrator
                .find_or_create(&address, peer.port(), &self.config.default_game)
                .await
                .ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, %peer, "server lookup failed");
                None
            }
        }?;

        self.bind_source(peer, row.server_id);
        Some(row.server_id)
    }

    async fn handle_beacon(&self, peer: SocketAddr, token: &str) {
        let prefix = auth::display_prefix(token);

        let row = match self.repo.find_server_by_token_prefix(prefix).await {
            Ok(row) => row,
            Err(err) => {
                warn!(%err, %peer, "beacon lookup failed");
                return;
            }
        };

        let verified = row.as_ref().is_some_and(|row| {
            row.token_hash
                .as_ref()
                .is_some_and(|hash| auth::verify_token(token, hash))
        });

        match (verified, row) {
            (true, Some(row)) => {
                Metrics::bump(&self.metrics.beacons_accepted);
                self.bind_source(peer, row.server_id);
                debug!(%peer, server_id = row.server_id, "beacon accepted");
            }
            _ => {
                Metrics::bump(&self.metrics.unknown_sources);
                if self.should_log_unknown(peer) {
                    warn!(%peer, "beacon with unknown or mismatched token");
                }
            }
        }
    }

    fn bind_source(&self, peer: SocketAddr, server_id: ServerId) {
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.insert(peer, server_id);
        }
    }

    fn should_log_unknown(&self, peer: SocketAddr) -> bool {
        let Ok(mut log) = self.unknown_log.lock() else {
            return false;
        };

        let now = Instant::now();
        match log.get(&peer) {
            Some(last) if now.duration_since(*last) < UNKNOWN_LOG_INTERVAL => false,
            _ => {
                log.insert(peer, now);
                true
            }
        }
    }
}
