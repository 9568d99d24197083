//! One RCON session against one game server.
//!
//! A session moves through `Closed → Connecting → Authenticating → Ready`
//! and bounces `Ready ↔ Busy` around each command. RCON is strictly
//! request/response, so a connection carries at most one in-flight command;
//! the pool serialises callers with a per-connection lock.

use crate::fragment::FragmentStore;
use crate::{EngineKind, RconError, goldsrc, source};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Authenticating,
    Ready,
    Busy,
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub fragment_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            fragment_timeout: Duration::from_secs(2),
        }
    }
}

enum Transport {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

pub struct RconConnection {
    kind: EngineKind,
    addr: SocketAddr,
    password: String,
    options: ConnectOptions,
    state: ConnectionState,
    transport: Option<Transport>,
    /// GoldSrc nonce. `None` means the session is not authenticated.
    challenge: Option<i64>,
    fragments: FragmentStore,
    read_buf: Vec<u8>,
    next_packet_id: i32,
    last_activity: Instant,
}

impl RconConnection {
    pub fn new(
        kind: EngineKind,
        addr: SocketAddr,
        password: impl Into<String>,
        options: ConnectOptions,
    ) -> Self {
        let fragment_timeout = options.fragment_timeout;

        Self {
            kind,
            addr,
            password: password.into(),
            options,
            state: ConnectionState::Closed,
            transport: None,
            challenge: None,
            fragments: FragmentStore::new(fragment_timeout),
            read_buf: Vec::new(),
            next_packet_id: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Ready | ConnectionState::Busy)
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Opens the socket and authenticates, GoldSrc sessions via a challenge
    /// round-trip, Source sessions via an auth packet. The whole exchange
    /// runs under the connect timeout; any failure tears the session down.
    pub async fn connect(&mut self) -> Result<(), RconError> {
        if self.password.is_empty() {
            return Err(RconError::InvalidCredentials);
        }
        if self.addr.port() == 0 {
            return Err(RconError::ConnectionFailed("port must be non-zero".to_string()));
        }

        self.teardown();
        self.state = ConnectionState::Connecting;

        match timeout(self.options.connect_timeout, self.establish()).await {
            Ok(Ok(())) => {
                self.state = ConnectionState::Ready;
                self.last_activity = Instant::now();
                debug!(addr = %self.addr, kind = ?self.kind, "rcon session established");
                Ok(())
            }
            Ok(Err(err)) => {
                self.teardown();
                Err(err)
            }
            Err(_) => {
                self.teardown();
                Err(RconError::Timeout("connect"))
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.teardown();
    }

    /// Runs one command. Only a `Ready` session accepts commands; an auth
    /// failure clears the challenge and closes the session so that the next
    /// call reconnects from scratch.
    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        if command.trim().is_empty() {
            return Err(RconError::CommandFailed("empty command".to_string()));
        }
        if self.state != ConnectionState::Ready {
            return Err(RconError::NotConnected);
        }

        self.state = ConnectionState::Busy;

        let outcome = match timeout(self.options.command_timeout, self.round_trip(command)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RconError::Timeout("command")),
        };

        match &outcome {
            // A rejected command leaves the session healthy.
            Ok(_) | Err(RconError::CommandFailed(_)) => {
                self.state = ConnectionState::Ready;
                self.last_activity = Instant::now();
            }
            Err(RconError::AuthFailed) => {
                self.challenge = None;
                self.teardown();
            }
            Err(_) => self.teardown(),
        }

        outcome
    }

    /// Reconnects first when the session is not `Ready`.
    pub async fn ensure_ready(&mut self) -> Result<(), RconError> {
        if self.state != ConnectionState::Ready {
            self.connect().await?;
        }

        Ok(())
    }

    fn teardown(&mut self) {
        self.transport = None;
        self.challenge = None;
        self.read_buf.clear();
        self.state = ConnectionState::Closed;
    }

    async fn establish(&mut self) -> Result<(), RconError> {
        if self.kind.uses_tcp() {
            let stream = TcpStream::connect(self.addr)
                .await
                .map_err(|err| RconError::ConnectionFailed(err.to_string()))?;
            self.transport = Some(Transport::Tcp(stream));
            self.state = ConnectionState::Authenticating;
            self.authenticate_source().await
        } else {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|err| RconError::ConnectionFailed(err.to_string()))?;
            socket
                .connect(self.addr)
                .await
                .map_err(|err| RconError::ConnectionFailed(err.to_string()))?;
            self.transport = Some(Transport::Udp(socket));
            self.state = ConnectionState::Authenticating;
            self.refresh_challenge().await
        }
    }

    async fn refresh_challenge(&mut self) -> Result<(), RconError> {
        self.udp_send(&goldsrc::encode_challenge_request()).await?;

        let mut buf = vec![0u8; 65_535];
        let n = self.udp_recv(&mut buf).await?;

        match goldsrc::decode_frame(&buf[..n])? {
            goldsrc::Frame::Complete(body) => {
                if goldsrc::classify(&body) == goldsrc::ResponseKind::BadPassword {
                    return Err(RconError::AuthFailed);
                }

                self.challenge = Some(
                    goldsrc::parse_challenge(&body)
                        .ok_or_else(|| RconError::InvalidResponse(body))?,
                );
                Ok(())
            }
            goldsrc::Frame::Fragment(_) => Err(RconError::InvalidResponse(
                "fragmented challenge response".to_string(),
            )),
        }
    }

    async fn authenticate_source(&mut self) -> Result<(), RconError> {
        let id = self.take_packet_id();
        let frame = source::encode(id, source::AUTH, &self.password);
        self.tcp_write(&frame).await?;

        loop {
            let packet = self.read_source_packet().await?;

            if packet.ptype != source::AUTH_RESPONSE {
                // Servers may send an empty response value ahead of the
                // auth response.
                continue;
            }

            if packet.id == -1 {
                return Err(RconError::AuthFailed);
            }
            if packet.id == id {
                return Ok(());
            }
        }
    }

    async fn round_trip(&mut self, command: &str) -> Result<String, RconError> {
        if self.kind.uses_tcp() {
            self.round_trip_source(command).await
        } else {
            self.round_trip_goldsrc(command).await
        }
    }

    async fn round_trip_goldsrc(&mut self, command: &str) -> Result<String, RconError> {
        let challenge = self.challenge.ok_or(RconError::NotConnected)?;
        let frame = goldsrc::encode_command(challenge, &self.password, command);
        self.udp_send(&frame).await?;

        let mut buf = vec![0u8; 65_535];

        loop {
            // With a bucket open, the next read is additionally bounded by
            // the fragment deadline.
            let n = match self.fragments.next_deadline() {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match timeout(remaining, self.udp_recv(&mut buf)).await {
                        Ok(n) => n?,
                        Err(_) => {
                            self.fragments.purge_expired(Instant::now());
                            return Err(RconError::Timeout("fragment reassembly"));
                        }
                    }
                }
                None => self.udp_recv(&mut buf).await?,
            };

            match goldsrc::decode_frame(&buf[..n])? {
                goldsrc::Frame::Complete(body) => return finish_goldsrc(body),
                goldsrc::Frame::Fragment(fragment) => {
                    if let Some(assembled) = self.fragments.insert(Instant::now(), &fragment) {
                        return finish_goldsrc(goldsrc::assembled_body(&assembled));
                    }
                }
            }
        }
    }

    async fn round_trip_source(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.take_packet_id();
        let terminator_id = self.take_packet_id();

        let frame = source::encode(id, source::EXEC_COMMAND, command);
        self.tcp_write(&frame).await?;
        // A trailing response-value request marks the end of a multi-packet
        // response: the server echoes it after everything else.
        let frame = source::encode(terminator_id, source::RESPONSE_VALUE, "");
        self.tcp_write(&frame).await?;

        let mut body = String::new();

        loop {
            let packet = self.read_source_packet().await?;

            if packet.id == -1 {
                return Err(RconError::AuthFailed);
            }
            if packet.id == terminator_id {
                return Ok(body);
            }
            if packet.id == id {
                body.push_str(&packet.body);
            }
        }
    }

    fn take_packet_id(&mut self) -> i32 {
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        self.next_packet_id
    }

    async fn udp_send(&mut self, frame: &[u8]) -> Result<(), RconError> {
        let Some(Transport::Udp(socket)) = self.transport.as_ref() else {
            return Err(RconError::NotConnected);
        };

        socket
            .send(frame)
            .await
            .map_err(|err| RconError::ConnectionFailed(err.to_string()))?;
        Ok(())
    }

    async fn udp_recv(&mut self, buf: &mut [u8]) -> Result<usize, RconError> {
        let Some(Transport::Udp(socket)) = self.transport.as_ref() else {
            return Err(RconError::NotConnected);
        };

        socket
            .recv(buf)
            .await
            .map_err(|err| RconError::ConnectionFailed(err.to_string()))
    }

    async fn tcp_write(&mut self, frame: &[u8]) -> Result<(), RconError> {
        let Some(Transport::Tcp(stream)) = self.transport.as_mut() else {
            return Err(RconError::NotConnected);
        };

        stream
            .write_all(frame)
            .await
            .map_err(|err| RconError::ConnectionFailed(err.to_string()))?;
        Ok(())
    }

    async fn read_source_packet(&mut self) -> Result<source::Packet, RconError> {
        let Self {
            transport, read_buf, ..
        } = self;

        let Some(Transport::Tcp(stream)) = transport.as_mut() else {
            return Err(RconError::NotConnected);
        };

        loop {
            if let Some((packet, used)) = source::decode(read_buf)? {
                read_buf.drain(..used);
                return Ok(packet);
            }

            let mut chunk = [0u8; 4096];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|err| RconError::ConnectionFailed(err.to_string()))?;

            if n == 0 {
                return Err(RconError::ConnectionFailed(
                    "connection closed by server".to_string(),
                ));
            }

            read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn finish_goldsrc(body: String) -> Result<String, RconError> {
    match goldsrc::classify(&body) {
        goldsrc::ResponseKind::Ok => Ok(body),
        goldsrc::ResponseKind::BadPassword | goldsrc::ResponseKind::BadChallenge => {
            Err(RconError::AuthFailed)
        }
        goldsrc::ResponseKind::UnknownCommand => Err(RconError::CommandFailed(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn single_frame(text: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF; 4];
        out.push(b'l');
        out.extend_from_slice(text);
        out
    }

    fn split_frame(packet_id: i32, total: u8, index: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFE, 0xFF, 0xFF, 0xFF];
        out.extend_from_slice(&packet_id.to_le_bytes());
        out.push((index << 4) | (total & 0x0F));
        out.extend_from_slice(payload);
        out
    }

    async fn serve_goldsrc_challenge(server: &UdpSocket) -> SocketAddr {
        let mut buf = [0u8; 2048];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[4..n], b"challenge rcon\n");
        server
            .send_to(b"\xff\xff\xff\xffchallenge rcon 5551212\n", peer)
            .await
            .unwrap();
        peer
    }

    #[tokio::test]
    async fn goldsrc_connect_and_execute() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            serve_goldsrc_challenge(&server).await;

            let mut buf = [0u8; 2048];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[4..n]).to_string();
            assert_eq!(request, "rcon 5551212 secret status\n");

            server
                .send_to(&single_frame(b"hostname:  Big Village\n"), peer)
                .await
                .unwrap();
        });

        let mut conn = RconConnection::new(
            EngineKind::GoldSrc,
            addr,
            "secret",
            ConnectOptions::default(),
        );

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Ready);

        let body = conn.execute("status").await.unwrap();
        assert_eq!(body, "hostname:  Big Village");
    }

    #[tokio::test]
    async fn goldsrc_reassembles_out_of_order_fragments() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            serve_goldsrc_challenge(&server).await;

            let mut buf = [0u8; 2048];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();

            // Index 1 first, then index 0.
            server
                .send_to(&split_frame(1, 2, 1, b"World"), peer)
                .await
                .unwrap();
            server
                .send_to(&split_frame(1, 2, 0, b"Hello "), peer)
                .await
                .unwrap();
        });

        let mut conn = RconConnection::new(
            EngineKind::GoldSrc,
            addr,
            "secret",
            ConnectOptions::default(),
        );

        conn.connect().await.unwrap();
        assert_eq!(conn.execute("say hi").await.unwrap(), "Hello World");
    }

    #[tokio::test]
    async fn goldsrc_partial_fragments_time_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            serve_goldsrc_challenge(&server).await;

            let mut buf = [0u8; 2048];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server
                .send_to(&split_frame(1, 2, 0, b"Hello "), peer)
                .await
                .unwrap();
        });

        let options = ConnectOptions {
            fragment_timeout: Duration::from_millis(100),
            ..ConnectOptions::default()
        };

        let mut conn = RconConnection::new(EngineKind::GoldSrc, addr, "secret", options);
        conn.connect().await.unwrap();

        assert!(matches!(
            conn.execute("status").await,
            Err(RconError::Timeout(_))
        ));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn goldsrc_auth_failure_closes_the_session() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            serve_goldsrc_challenge(&server).await;

            let mut buf = [0u8; 2048];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server
                .send_to(&single_frame(b"Bad rcon_password.\n"), peer)
                .await
                .unwrap();
        });

        let mut conn = RconConnection::new(
            EngineKind::GoldSrc,
            addr,
            "secret",
            ConnectOptions::default(),
        );

        conn.connect().await.unwrap();
        assert_eq!(conn.execute("status").await, Err(RconError::AuthFailed));
        assert_eq!(conn.state(), ConnectionState::Closed);

        // A closed session rejects commands until reconnected.
        assert_eq!(conn.execute("status").await, Err(RconError::NotConnected));
    }

    #[tokio::test]
    async fn rejects_empty_commands_and_credentials() {
        let mut conn = RconConnection::new(
            EngineKind::GoldSrc,
            "127.0.0.1:27015".parse().unwrap(),
            "",
            ConnectOptions::default(),
        );
        assert_eq!(conn.connect().await, Err(RconError::InvalidCredentials));

        let mut conn = RconConnection::new(
            EngineKind::Source,
            "127.0.0.1:27015".parse().unwrap(),
            "secret",
            ConnectOptions::default(),
        );
        assert!(matches!(
            conn.execute("  ").await,
            Err(RconError::CommandFailed(_))
        ));
    }

    async fn read_source_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> source::Packet {
        loop {
            if let Some((packet, used)) = source::decode(buf).unwrap() {
                buf.drain(..used);
                return packet;
            }

            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed unexpectedly");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn source_auth_and_multi_packet_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();

            let auth = read_source_request(&mut stream, &mut buf).await;
            assert_eq!(auth.ptype, source::AUTH);
            assert_eq!(auth.body, "secret");
            stream
                .write_all(&source::encode(auth.id, source::AUTH_RESPONSE, ""))
                .await
                .unwrap();

            let command = read_source_request(&mut stream, &mut buf).await;
            assert_eq!(command.body, "cvarlist");
            let terminator = read_source_request(&mut stream, &mut buf).await;

            stream
                .write_all(&source::encode(command.id, source::RESPONSE_VALUE, "part one, "))
                .await
                .unwrap();
            stream
                .write_all(&source::encode(command.id, source::RESPONSE_VALUE, "part two"))
                .await
                .unwrap();
            stream
                .write_all(&source::encode(terminator.id, source::RESPONSE_VALUE, ""))
                .await
                .unwrap();
        });

        let mut conn = RconConnection::new(
            EngineKind::Source,
            addr,
            "secret",
            ConnectOptions::default(),
        );

        conn.connect().await.unwrap();
        let body = conn.execute("cvarlist").await.unwrap();
        assert_eq!(body, "part one, part two");
    }

    #[tokio::test]
    async fn source_auth_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();

            let _auth = read_source_request(&mut stream, &mut buf).await;
            stream
                .write_all(&source::encode(-1, source::AUTH_RESPONSE, ""))
                .await
                .unwrap();
        });

        let mut conn = RconConnection::new(
            EngineKind::Source,
            addr,
            "wrong",
            ConnectOptions::default(),
        );

        assert_eq!(conn.connect().await, Err(RconError::AuthFailed));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
