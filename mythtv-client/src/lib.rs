//! Async client for the MythTV backend protocol.
//!
//! Connections negotiate the protocol version, announce a role and then
//! exchange framed commands with the backend. On top of that this crate
//! provides free input queries, recorder sessions for live TV, an event
//! listener and a [`SessionManager`] that ties them together behind integer
//! handles.
//!
//! ```no_run
//! use mythtv_client::{ClientConfig, SessionManager, NO_SESSION};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), mythtv_client::ClientError> {
//! let config = ClientConfig::load(None)?;
//! let mut manager = SessionManager::new(config.manager_config());
//!
//! let handle = manager.spawn_live_tv("1001").await?;
//! if handle != NO_SESSION {
//!     let path = manager
//!         .current_recording_path(handle, &config.storage_group_maps, &CancellationToken::new())
//!         .await?;
//!     println!("{}", path);
//!     manager.stop_live_tv(handle).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod manager;

#[cfg(test)]
mod testing;

pub use client::{
    Chain, Connection, ConnectionConfig, EventHandler, EventListener, InputSelector, Recorder,
    RecorderState, SubscriptionId,
};
pub use config::ClientConfig;
pub use error::ClientError;
pub use manager::{resolve_local_path, ManagerConfig, SessionManager, NO_SESSION};
