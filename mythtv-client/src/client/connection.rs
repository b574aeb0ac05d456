//! TCP connection management for the MythTV backend protocol.
//!
//! A [`Connection`] owns one socket, negotiates the protocol version and
//! announces its role. Commands are strictly request/response: every
//! command method takes `&mut self`, so a connection never has more than
//! one outstanding request.

use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use mythtv_protocol::{
    decode_header, decode_payload, encode_frame, latest_protocol_version, protocol_token,
    split_fields, AnnounceMode, EventMode, ProtocolError, DEFAULT_PORT, HEADER_SIZE,
    MIN_ANNOUNCE_VERSION,
};

use crate::error::ClientError;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Backend host name or address.
    pub host: String,
    /// Backend protocol port.
    pub port: u16,
    /// Client name sent in the announce command.
    pub client_name: String,
    /// Upper bound for each TCP connect.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            client_name: "mythtv-live".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` string used in logs and errors.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reads length-prefixed frames from the backend.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one frame and split it into fields.
    ///
    /// Returns [`ClientError::ConnectionClosed`] when the peer closes the
    /// socket, including in the middle of a frame.
    pub async fn read_frame(&mut self) -> Result<Vec<String>, ClientError> {
        let mut header = [0u8; HEADER_SIZE];
        self.read_exact(&mut header).await?;

        let len = decode_header(&header)?.ok_or(ProtocolError::InvalidLength(
            String::from_utf8_lossy(&header).into_owned(),
        ))?;

        let mut payload = BytesMut::zeroed(len);
        self.read_exact(&mut payload).await?;

        let text = decode_payload(&payload);
        debug!("[MythTV] Received: {}", text);
        Ok(split_fields(&text))
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ClientError> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ClientError::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes length-prefixed frames to the backend.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Frame and send one payload.
    pub async fn write_frame(&mut self, payload: &str) -> Result<(), ClientError> {
        let frame = encode_frame(payload)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the socket.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// One socket to the backend, announced in a fixed mode.
pub struct Connection {
    config: ConnectionConfig,
    announce_mode: AnnounceMode,
    event_mode: EventMode,
    reader: Option<FrameReader<OwnedReadHalf>>,
    writer: Option<FrameWriter<OwnedWriteHalf>>,
    is_open: bool,
    proto_version: u32,
}

impl Connection {
    /// Create an unopened connection.
    pub fn new(config: ConnectionConfig, announce_mode: AnnounceMode, event_mode: EventMode) -> Self {
        Self {
            config,
            announce_mode,
            event_mode,
            reader: None,
            writer: None,
            is_open: false,
            proto_version: 0,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn event_mode(&self) -> EventMode {
        self.event_mode
    }

    /// Whether the handshake completed and the connection was not closed.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Negotiated protocol version, 0 before the first successful open.
    pub fn proto_version(&self) -> u32 {
        self.proto_version
    }

    /// Connect, negotiate the protocol version and announce.
    ///
    /// Opening an already open connection is a no-op.
    pub async fn open(&mut self) -> Result<(), ClientError> {
        if self.is_open {
            return Ok(());
        }

        info!("[MythTV] Initiating connection to {}", self.config.server_addr());
        self.negotiate().await?;

        if self.proto_version >= MIN_ANNOUNCE_VERSION {
            if let Err(e) = self.announce().await {
                self.close().await;
                return Err(e);
            }
        }

        info!(
            "[MythTV] Connection opened ({} mode), protocol version {}",
            self.announce_mode, self.proto_version
        );
        Ok(())
    }

    async fn negotiate(&mut self) -> Result<(), ClientError> {
        let latest = latest_protocol_version();
        let reply = self.probe_version(latest).await?;
        if is_accept(&reply) {
            self.mark_open(latest);
            return Ok(());
        }

        // Rejected: the backend closes the socket after a failed probe.
        self.release();

        let server_version = reply
            .get(1)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| ClientError::VersionRejected {
                version: latest,
                reply: reply.join(" "),
            })?;

        if protocol_token(server_version).is_none() {
            return Err(ProtocolError::UnknownVersion(server_version).into());
        }

        info!(
            "[MythTV] Backend speaks protocol {}, reconnecting",
            server_version
        );
        let reply = self.probe_version(server_version).await?;
        if is_accept(&reply) {
            self.mark_open(server_version);
            return Ok(());
        }

        self.release();
        Err(ClientError::VersionRejected {
            version: server_version,
            reply: reply.join(" "),
        })
    }

    async fn probe_version(&mut self, version: u32) -> Result<Vec<String>, ClientError> {
        let token = protocol_token(version).ok_or(ProtocolError::UnknownVersion(version))?;
        self.connect().await?;

        let result = self
            .send_command(&format!("MYTH_PROTO_VERSION {} {}", version, token))
            .await;
        if result.is_err() {
            self.release();
        }
        result
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        let addr = self.config.server_addr();
        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::ConnectTimeout(addr)),
        };

        stream.set_nodelay(true)?;
        debug!("[MythTV] TCP connection established to {}", addr);

        let (reader, writer) = stream.into_split();
        self.reader = Some(FrameReader::new(reader));
        self.writer = Some(FrameWriter::new(writer));
        Ok(())
    }

    async fn announce(&mut self) -> Result<(), ClientError> {
        let command = format!(
            "ANN {} {} {}",
            self.announce_mode,
            self.config.client_name,
            self.event_mode.code()
        );
        let reply = self.send_command(&command).await?;
        if first_field(&reply) == "OK" {
            Ok(())
        } else {
            Err(ClientError::AnnounceRejected(reply.join(" ")))
        }
    }

    fn mark_open(&mut self, version: u32) {
        self.proto_version = version;
        self.is_open = true;
    }

    fn release(&mut self) {
        self.reader = None;
        self.writer = None;
        self.is_open = false;
    }

    /// Send a command and wait for its reply.
    pub async fn send_command(&mut self, command: &str) -> Result<Vec<String>, ClientError> {
        self.send_only(command).await?;
        self.read_response().await
    }

    /// Send a command without waiting for a reply.
    pub async fn send_only(&mut self, command: &str) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotOpen)?;
        debug!("[MythTV] Sending: {}", command);
        let result = writer.write_frame(command).await;
        self.check_transport(result)
    }

    /// Wait for the next frame on this connection.
    pub async fn read_response(&mut self) -> Result<Vec<String>, ClientError> {
        let reader = self.reader.as_mut().ok_or(ClientError::NotOpen)?;
        let result = reader.read_frame().await;
        self.check_transport(result)
    }

    /// Drop the socket once it is known dead so the next `open` reconnects.
    fn check_transport<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e @ (ClientError::ConnectionClosed | ClientError::Io(_))) = &result {
            warn!("[MythTV] Connection to {} lost: {}", self.config.server_addr(), e);
            self.release();
        }
        result
    }

    /// Hand the read half to a dedicated receive task.
    ///
    /// The connection keeps its write half, so [`Connection::close`] can
    /// still send the termination command.
    pub(crate) fn take_reader(&mut self) -> Option<FrameReader<OwnedReadHalf>> {
        self.reader.take()
    }

    /// Send `DONE` if open, then release the socket.
    ///
    /// Never fails; closing a closed connection is a no-op.
    pub async fn close(&mut self) {
        if self.is_open {
            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.write_frame("DONE").await {
                    warn!("[MythTV] Failed to send DONE: {}", e);
                } else if let Err(e) = writer.shutdown().await {
                    debug!("[MythTV] Socket shutdown failed: {}", e);
                }
            }
            info!(
                "[MythTV] Connection closed, protocol version {}",
                self.proto_version
            );
        }
        self.release();
    }
}

fn first_field(fields: &[String]) -> &str {
    fields.first().map(String::as_str).unwrap_or_default()
}

fn is_accept(reply: &[String]) -> bool {
    first_field(reply) == "ACCEPT"
}

/// Whether a reply starts with `OK`.
pub(crate) fn is_ok(reply: &[String]) -> bool {
    first_field(reply) == "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, Script};

    #[tokio::test]
    async fn test_frame_reader_handles_partial_writes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(client);

        let writer = tokio::spawn(async move {
            for chunk in ["1", "2      OK[", "]:[]", "extra"] {
                server.write_all(chunk.as_bytes()).await.unwrap();
                tokio::task::yield_now().await;
            }
            server
        });

        let fields = reader.read_frame().await.unwrap();
        assert_eq!(fields, vec!["OK", "extra"]);
        drop(writer.await.unwrap());
        assert!(matches!(reader.read_frame().await, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_frame_reader_rejects_bad_header() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(client);
        server.write_all(b"garbage!payload").await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(ClientError::Protocol(ProtocolError::InvalidLength(_)))
        ));
    }

    #[tokio::test]
    async fn test_frame_writer_output() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        writer.write_frame("DONE").await.unwrap();
        drop(writer);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, b"4       DONE");
    }

    #[tokio::test]
    async fn test_open_at_latest_version() {
        let backend = MockBackend::start(Script::new(91)).await;
        let mut conn = Connection::new(backend.config(), AnnounceMode::Monitor, EventMode::None);

        conn.open().await.unwrap();
        assert!(conn.is_open());
        assert_eq!(conn.proto_version(), 91);
        assert_eq!(backend.accepted(), 1);
        assert_eq!(
            backend.commands_on(0),
            vec!["MYTH_PROTO_VERSION 91 BuzzOff", "ANN Monitor mythtv-live 0"]
        );

        conn.close().await;
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_version_downgrade() {
        let backend = MockBackend::start(Script::new(89)).await;
        let mut conn = Connection::new(backend.config(), AnnounceMode::Playback, EventMode::None);

        conn.open().await.unwrap();
        assert_eq!(conn.proto_version(), 89);
        assert_eq!(backend.accepted(), 2);
        assert_eq!(backend.commands_on(0), vec!["MYTH_PROTO_VERSION 91 BuzzOff"]);
        assert_eq!(
            backend.commands_on(1),
            vec!["MYTH_PROTO_VERSION 89 BuzzKill", "ANN Playback mythtv-live 0"]
        );
    }

    #[tokio::test]
    async fn test_unknown_version_is_fatal() {
        let backend = MockBackend::start(Script::new(50)).await;
        let mut conn = Connection::new(backend.config(), AnnounceMode::Monitor, EventMode::None);

        let err = conn.open().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::UnknownVersion(50))
        ));
        assert!(!conn.is_open());
        assert_eq!(backend.accepted(), 1);
    }

    #[tokio::test]
    async fn test_announce_rejected_closes() {
        let mut script = Script::new(91);
        script.announce_reply = "ERROR".to_string();
        let backend = MockBackend::start(script).await;
        let mut conn = Connection::new(backend.config(), AnnounceMode::Monitor, EventMode::All);

        let err = conn.open().await.unwrap_err();
        assert!(matches!(err, ClientError::AnnounceRejected(_)));
        assert!(!conn.is_open());
        assert!(matches!(conn.send_command("GET_FREE_INPUT_INFO 0").await, Err(ClientError::NotOpen)));
        backend.wait_for_command("DONE").await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = MockBackend::start(Script::new(91)).await;
        let mut conn = Connection::new(backend.config(), AnnounceMode::Monitor, EventMode::None);

        // Never opened
        conn.close().await;

        conn.open().await.unwrap();
        conn.close().await;
        conn.close().await;
        backend.wait_for_command("DONE").await;
        assert_eq!(backend.count_commands("DONE"), 1);
    }

    #[tokio::test]
    async fn test_backend_hangup_marks_connection_closed() {
        let backend = MockBackend::start(Script::new(91)).await;
        let mut conn = Connection::new(backend.config(), AnnounceMode::Monitor, EventMode::None);
        conn.open().await.unwrap();

        backend.hang_up(0).await;
        let err = conn.send_command("GET_FREE_INPUT_INFO 0").await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed | ClientError::Io(_)));
        assert!(!conn.is_open());
        assert!(matches!(conn.send_command("GET_FREE_INPUT_INFO 0").await, Err(ClientError::NotOpen)));

        conn.open().await.unwrap();
        assert!(conn.is_open());
        assert_eq!(backend.accepted(), 2);
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..ConnectionConfig::default()
        };
        let mut conn = Connection::new(config, AnnounceMode::Monitor, EventMode::None);
        assert!(matches!(conn.open().await, Err(ClientError::Io(_))));
    }
}
