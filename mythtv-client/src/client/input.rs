//! Free tuner queries.

use log::{debug, info};

use mythtv_protocol::{decode_inputs, AnnounceMode, EventMode, Input};

use super::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;

/// Ask the backend which inputs are free, decoded for the negotiated version.
///
/// An empty reply means every tuner is busy and yields an empty list.
pub async fn free_inputs(conn: &mut Connection) -> Result<Vec<Input>, ClientError> {
    let fields = conn.send_command("GET_FREE_INPUT_INFO 0").await?;
    let inputs = decode_inputs(&fields, conn.proto_version())?;
    debug!("[MythTV] {} free input(s)", inputs.len());
    Ok(inputs)
}

/// First free input, or `None` when no tuner is available.
pub async fn free_input(conn: &mut Connection) -> Result<Option<Input>, ClientError> {
    Ok(free_inputs(conn).await?.into_iter().next())
}

/// Owns a monitor connection used only for input queries.
pub struct InputSelector {
    conn: Connection,
}

impl InputSelector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config, AnnounceMode::Monitor, EventMode::None),
        }
    }

    async fn ensure_open(&mut self) -> Result<(), ClientError> {
        if !self.conn.is_open() {
            self.conn.open().await?;
        }
        Ok(())
    }

    pub async fn free_inputs(&mut self) -> Result<Vec<Input>, ClientError> {
        self.ensure_open().await?;
        free_inputs(&mut self.conn).await
    }

    pub async fn free_input(&mut self) -> Result<Option<Input>, ClientError> {
        self.ensure_open().await?;
        let input = free_input(&mut self.conn).await?;
        match &input {
            Some(i) => info!(
                "[MythTV] Selected input {} (card {}, source {})",
                i.input_name, i.card_id, i.source_id
            ),
            None => info!("[MythTV] No free input available"),
        }
        Ok(input)
    }

    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}
