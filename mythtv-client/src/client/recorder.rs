//! Recorder sessions driving live TV on one tuner.

use log::{debug, info, warn};

use mythtv_protocol::{
    decode_program, decode_storage_group_file, join_fields, AnnounceMode, EventMode, Program,
    StorageGroupFile,
};

use super::chain::Chain;
use super::connection::{is_ok, Connection, ConnectionConfig};
use crate::error::ClientError;

/// Recorder session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No connection yet.
    Unopened,
    /// Connected, not streaming.
    Idle,
    /// Live TV spawned and not yet stopped.
    Playing,
    /// Connection released; terminal.
    Closed,
}

/// A playback connection bound to one card.
pub struct Recorder {
    card_id: u32,
    conn: Option<Connection>,
    state: RecorderState,
    live_recording: bool,
}

impl Recorder {
    pub fn new(config: ConnectionConfig, card_id: u32) -> Self {
        Self {
            card_id,
            conn: Some(Connection::new(config, AnnounceMode::Playback, EventMode::None)),
            state: RecorderState::Unopened,
            live_recording: false,
        }
    }

    pub fn card_id(&self) -> u32 {
        self.card_id
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == RecorderState::Playing
    }

    /// Whether the last fetched recording lives in the LiveTV storage group.
    pub fn is_live_recording(&self) -> bool {
        self.live_recording
    }

    /// The playback connection, reconnected if its socket was lost.
    ///
    /// Recorder commands address the card by id, so a fresh connection can
    /// pick up a session started on an earlier one.
    async fn connection(&mut self) -> Result<&mut Connection, ClientError> {
        if matches!(self.state, RecorderState::Unopened | RecorderState::Closed) {
            return Err(ClientError::NotOpen);
        }
        let card_id = self.card_id;
        let conn = self.conn.as_mut().ok_or(ClientError::NotOpen)?;
        if !conn.is_open() {
            info!(
                "[MythTV] Reconnecting recorder for card {} to {}",
                card_id,
                conn.config().server_addr()
            );
            conn.open().await?;
        }
        Ok(conn)
    }

    fn recorder_command(&self, args: &[&str]) -> String {
        let scope = format!("QUERY_RECORDER {}", self.card_id);
        let mut fields = vec![scope.as_str()];
        fields.extend_from_slice(args);
        join_fields(&fields)
    }

    /// Open the playback connection if needed.
    pub async fn open(&mut self) -> Result<(), ClientError> {
        match self.state {
            RecorderState::Closed => Err(ClientError::NotOpen),
            RecorderState::Unopened => {
                let conn = self.conn.as_mut().ok_or(ClientError::NotOpen)?;
                conn.open().await?;
                self.state = RecorderState::Idle;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Start live TV on `channel` within `chain`.
    ///
    /// Returns whether the recorder is now playing.
    pub async fn spawn_live_tv(&mut self, chain: &Chain, channel: &str) -> Result<bool, ClientError> {
        self.open().await?;

        let command = self.recorder_command(&["SPAWN_LIVETV", chain.uid(), "0", channel]);
        // Mark playing before the reply so a racing stop targets this session.
        self.state = RecorderState::Playing;

        let result = match self.connection().await {
            Ok(conn) => conn.send_command(&command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(reply) if is_ok(&reply) => {
                info!(
                    "[MythTV] Live TV spawned on card {}, channel {}",
                    self.card_id, channel
                );
                Ok(true)
            }
            Ok(reply) => {
                warn!(
                    "[MythTV] Card {} refused live TV on channel {}: {}",
                    self.card_id,
                    channel,
                    reply.join(" ")
                );
                self.state = RecorderState::Idle;
                Ok(false)
            }
            Err(e) => {
                self.state = RecorderState::Idle;
                Err(e)
            }
        }
    }

    /// Stop live TV and release the connection.
    ///
    /// Returns false when the backend did not acknowledge; the session then
    /// stays in its current state. Stopping an unopened or closed recorder
    /// is a no-op.
    pub async fn stop_live_tv(&mut self) -> Result<bool, ClientError> {
        if matches!(self.state, RecorderState::Unopened | RecorderState::Closed) {
            return Ok(true);
        }

        let command = self.recorder_command(&["STOP_LIVETV"]);
        let reply = self.connection().await?.send_command(&command).await?;
        if !is_ok(&reply) {
            warn!(
                "[MythTV] Card {} did not stop live TV: {}",
                self.card_id,
                reply.join(" ")
            );
            return Ok(false);
        }

        info!("[MythTV] Live TV stopped on card {}", self.card_id);
        self.close().await;
        Ok(true)
    }

    /// Fetch the program the recorder is currently writing.
    pub async fn current_recording(&mut self) -> Result<Program, ClientError> {
        let command = self.recorder_command(&["GET_CURRENT_RECORDING"]);
        let reply = self.connection().await?.send_command(&command).await?;
        let program = decode_program(&reply)?;
        self.live_recording = program.is_live_tv();
        Ok(program)
    }

    /// Look up a file in a storage group on `host`.
    pub async fn query_sg_file(
        &mut self,
        host: &str,
        storage_group: &str,
        file_name: &str,
    ) -> Result<StorageGroupFile, ClientError> {
        let command = join_fields(&["QUERY_SG_FILEQUERY", host, storage_group, file_name]);
        let reply = self.connection().await?.send_command(&command).await?;
        Ok(decode_storage_group_file(&reply, host, storage_group)?)
    }

    /// Release the connection without stopping live TV.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.close().await;
        }
        self.state = RecorderState::Closed;
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.state != RecorderState::Playing {
            return;
        }
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        let card_id = self.card_id;
        let command = self.recorder_command(&["STOP_LIVETV"]);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("[MythTV] Recorder {} dropped while playing, stopping", card_id);
                handle.spawn(async move {
                    if let Err(e) = conn.send_command(&command).await {
                        warn!("[MythTV] Best-effort stop of card {} failed: {}", card_id, e);
                    }
                    conn.close().await;
                });
            }
            Err(_) => {
                warn!(
                    "[MythTV] Recorder {} dropped outside a runtime, live TV left running",
                    card_id
                );
            }
        }
    }
}

/// One attempt at locating the file a recorder is writing.
pub(crate) trait RecordingProbe {
    /// Returns the file once the backend reports a non-zero size.
    async fn probe(&mut self) -> Result<Option<StorageGroupFile>, ClientError>;

    /// Called when a probe was cut short; the reply may still be in flight.
    async fn abandon(&mut self);
}

impl RecordingProbe for Recorder {
    async fn probe(&mut self) -> Result<Option<StorageGroupFile>, ClientError> {
        let program = self.current_recording().await?;
        let file = self
            .query_sg_file(&program.host_name, &program.storage_group, &program.file_name)
            .await?;
        debug!(
            "[MythTV] {} is {} bytes on {}",
            file.file_name, file.size, file.host_name
        );
        Ok((file.size > 0).then_some(file))
    }

    async fn abandon(&mut self) {
        // A late reply would be read as the answer to the next command.
        if let Some(conn) = self.conn.as_mut() {
            conn.close().await;
        }
    }
}
