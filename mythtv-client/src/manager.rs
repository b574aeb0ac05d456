//! Live TV session management.
//!
//! The [`SessionManager`] hands out integer handles for recorder sessions.
//! An event listener runs while at least one session is registered and is
//! torn down when the last one ends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mythtv_protocol::{BackendEvent, EventMode, Input, StorageGroupFile, StorageGroupMap};

use crate::client::events::DEFAULT_STOP_GRACE;
use crate::client::recorder::RecordingProbe;
use crate::client::{Chain, ConnectionConfig, EventHandler, EventListener, InputSelector, Recorder};
use crate::error::ClientError;

/// Handle returned when no session could be started.
pub const NO_SESSION: u32 = 0;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub connection: ConnectionConfig,
    /// Event filter for the listener connection.
    pub event_mode: EventMode,
    /// Delay between readiness polls of a new recording.
    pub poll_interval: Duration,
    /// Give up waiting for a recording after this long. `None` waits until cancelled.
    pub poll_timeout: Option<Duration>,
    /// How long a stopping listener may take to drain.
    pub stop_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            event_mode: EventMode::ExcludeSystem,
            poll_interval: Duration::from_millis(500),
            poll_timeout: None,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

/// Registry of live TV sessions keyed by handle.
pub struct SessionManager {
    config: ManagerConfig,
    inputs: InputSelector,
    recorders: BTreeMap<u32, Recorder>,
    next_handle: u32,
    events: Option<EventListener>,
    handlers: Vec<EventHandler>,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            inputs: InputSelector::new(config.connection.clone()),
            config,
            recorders: BTreeMap::new(),
            next_handle: NO_SESSION,
            events: None,
            handlers: Vec::new(),
        }
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.recorders.len()
    }

    /// Whether the event listener is currently running.
    pub fn is_listening(&self) -> bool {
        self.events.as_ref().is_some_and(EventListener::is_running)
    }

    pub fn is_playing(&self, handle: u32) -> bool {
        self.recorders.get(&handle).is_some_and(Recorder::is_playing)
    }

    /// Whether the session's last fetched recording is a LiveTV recording.
    pub fn is_live_recording(&self, handle: u32) -> bool {
        self.recorders
            .get(&handle)
            .is_some_and(Recorder::is_live_recording)
    }

    /// Register a handler for backend events.
    ///
    /// Handlers are attached to the listener of every future session as well
    /// as the one currently running.
    pub fn subscribe(&mut self, handler: EventHandler) {
        if let Some(events) = &self.events {
            events.subscribe(Arc::clone(&handler));
        }
        self.handlers.push(handler);
    }

    /// Free tuner inputs, in the backend's order.
    pub async fn free_inputs(&mut self) -> Result<Vec<Input>, ClientError> {
        self.inputs.free_inputs().await
    }

    /// Start live TV on `channel`.
    ///
    /// Returns the new session handle, or [`NO_SESSION`] when no tuner is
    /// free or the backend refused to spawn.
    pub async fn spawn_live_tv(&mut self, channel: &str) -> Result<u32, ClientError> {
        self.ensure_listener().await?;

        let input = match self.inputs.free_input().await {
            Ok(Some(input)) => input,
            Ok(None) => {
                self.release_listener_if_idle().await;
                return Ok(NO_SESSION);
            }
            Err(e) => {
                self.release_listener_if_idle().await;
                return Err(e);
            }
        };

        let chain = Chain::new();
        let mut recorder = Recorder::new(self.config.connection.clone(), input.card_id);
        match recorder.spawn_live_tv(&chain, channel).await {
            Ok(true) => {
                let handle = self.allocate_handle();
                info!(
                    "[MythTV] Session {} playing channel {} on {} (chain {})",
                    handle, channel, input.input_name, chain
                );
                self.recorders.insert(handle, recorder);
                Ok(handle)
            }
            Ok(false) => {
                if let Err(e) = recorder.stop_live_tv().await {
                    debug!("[MythTV] Best-effort stop after failed spawn: {}", e);
                }
                recorder.close().await;
                self.release_listener_if_idle().await;
                Ok(NO_SESSION)
            }
            Err(e) => {
                error!("[MythTV] Failed to spawn live TV on channel {}: {}", channel, e);
                recorder.close().await;
                self.release_listener_if_idle().await;
                Err(e)
            }
        }
    }

    /// Wait for the session's recording to hold data and map it to a local path.
    ///
    /// Polls the backend until the file size is non-zero, sleeping the
    /// configured interval between attempts. Ends early with
    /// [`ClientError::Cancelled`] when `cancel` fires, even while a query is
    /// outstanding; the session's connection is then dropped and the next
    /// command on it reconnects.
    pub async fn current_recording_path(
        &mut self,
        handle: u32,
        maps: &[StorageGroupMap],
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let recorder = self
            .recorders
            .get_mut(&handle)
            .filter(|r| r.is_playing())
            .ok_or(ClientError::SessionNotPlaying(handle))?;

        let (file, attempts) = wait_for_recording(
            recorder,
            self.config.poll_interval,
            self.config.poll_timeout,
            cancel,
        )
        .await?;
        debug!(
            "[MythTV] Session {} recording ready after {} poll(s)",
            handle, attempts
        );

        resolve_local_path(&file, maps)
    }

    /// Stop and forget a session.
    ///
    /// Returns false when the handle was unknown or the backend refused the
    /// stop; the session is removed and its connection closed either way.
    pub async fn stop_live_tv(&mut self, handle: u32) -> Result<bool, ClientError> {
        let Some(mut recorder) = self.recorders.remove(&handle) else {
            return Ok(false);
        };

        let result = if recorder.is_playing() {
            recorder.stop_live_tv().await
        } else {
            Ok(true)
        };
        if !matches!(result, Ok(true)) {
            warn!("[MythTV] Session {} did not stop cleanly, closing", handle);
        }
        recorder.close().await;
        info!("[MythTV] Session {} ended", handle);

        self.release_listener_if_idle().await;
        result
    }

    /// Stop every session and close all connections.
    pub async fn shutdown(&mut self) {
        let handles: Vec<u32> = self.recorders.keys().copied().collect();
        for handle in handles {
            if let Err(e) = self.stop_live_tv(handle).await {
                warn!("[MythTV] Failed to stop session {}: {}", handle, e);
            }
        }
        self.release_listener_if_idle().await;
        self.inputs.close().await;
    }

    /// Next free handle. Wraps past `u32::MAX`, skipping [`NO_SESSION`] and
    /// handles still in use.
    fn allocate_handle(&mut self) -> u32 {
        loop {
            self.next_handle = self.next_handle.wrapping_add(1);
            if self.next_handle != NO_SESSION && !self.recorders.contains_key(&self.next_handle) {
                return self.next_handle;
            }
        }
    }

    async fn ensure_listener(&mut self) -> Result<(), ClientError> {
        if self.events.as_ref().is_some_and(EventListener::is_running) {
            return Ok(());
        }
        if let Some(mut dead) = self.events.take() {
            warn!("[MythTV] Event listener went away, starting a new one");
            dead.stop().await;
        }

        let mut events = EventListener::new(self.config.connection.clone(), self.config.event_mode)
            .with_stop_grace(self.config.stop_grace);
        events.subscribe(Arc::new(|event: &BackendEvent| {
            debug!("[MythTV] Backend event {} {}", event.name, event.args.join(" "));
        }));
        for handler in &self.handlers {
            events.subscribe(Arc::clone(handler));
        }

        events.start().await?;
        self.events = Some(events);
        Ok(())
    }

    async fn release_listener_if_idle(&mut self) {
        if !self.recorders.is_empty() {
            return;
        }
        if let Some(mut events) = self.events.take() {
            events.stop().await;
        }
    }
}

/// Probe until the recording holds data.
///
/// Sleeps `interval` only after a probe that found nothing, so readiness on
/// attempt N costs N-1 sleeps. Returns the file and the number of attempts.
pub(crate) async fn wait_for_recording<P: RecordingProbe>(
    probe: &mut P,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(StorageGroupFile, u32), ClientError> {
    let deadline = timeout.map(|t| (Instant::now() + t, t));
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        attempts += 1;
        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            found = probe.probe() => Some(found),
        };
        let Some(found) = found else {
            probe.abandon().await;
            return Err(ClientError::Cancelled);
        };
        if let Some(file) = found? {
            return Ok((file, attempts));
        }

        if let Some((deadline, timeout)) = deadline {
            if Instant::now() >= deadline {
                return Err(ClientError::PollTimeout(timeout));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Rewrite a backend path through the map for its storage group.
pub fn resolve_local_path(
    file: &StorageGroupFile,
    maps: &[StorageGroupMap],
) -> Result<String, ClientError> {
    let map = maps
        .iter()
        .find(|m| m.group_name == file.storage_group)
        .ok_or_else(|| ClientError::NoStorageGroupMap(file.storage_group.clone()))?;

    map.remap(&file.file_name)
        .ok_or_else(|| ClientError::PathOutsideStorageGroup {
            path: file.file_name.clone(),
            dir: map.dir_name.clone(),
        })
}
