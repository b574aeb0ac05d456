//! Asynchronous backend event listener.
//!
//! The listener owns a monitor connection. Once the handshake completes the
//! read half moves into a receive task that decodes every frame and hands it
//! to the registered subscribers, in registration order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use mythtv_protocol::{decode_event, AnnounceMode, BackendEvent, EventMode, BACKEND_MESSAGE};

use super::connection::{Connection, ConnectionConfig, FrameReader};
use crate::error::ClientError;

/// How long `stop` waits for the receive task before aborting it.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Callback invoked for every decoded event.
pub type EventHandler = Arc<dyn Fn(&BackendEvent) + Send + Sync>;

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered list of event handlers.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, EventHandler)>>,
}

impl Subscribers {
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, handler));
        id
    }

    /// Returns true if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event once to each current subscriber.
    pub fn broadcast(&self, event: &BackendEvent) {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Monitor connection that streams backend events to subscribers.
pub struct EventListener {
    conn: Connection,
    subscribers: Arc<Subscribers>,
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    stop_grace: Duration,
}

impl EventListener {
    pub fn new(config: ConnectionConfig, event_mode: EventMode) -> Self {
        Self {
            conn: Connection::new(config, AnnounceMode::Monitor, event_mode),
            subscribers: Arc::new(Subscribers::default()),
            running: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(false)),
            task: None,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.subscribers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// True while the receive loop is running on an open connection.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.open.load(Ordering::SeqCst)
    }

    /// Open the monitor connection and start the receive loop.
    ///
    /// A listener whose loop ended because the backend hung up reconnects.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if !self.conn.is_open() {
            self.conn.open().await?;
        }
        let reader = match self.conn.take_reader() {
            Some(reader) => reader,
            None => {
                // The read half went to a previous receive loop.
                info!("[MythTV] Event connection lost, reconnecting");
                self.conn.close().await;
                self.conn.open().await?;
                self.conn.take_reader().ok_or(ClientError::NotOpen)?
            }
        };

        self.running.store(true, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        self.task = Some(tokio::spawn(receive_loop(
            reader,
            Arc::clone(&self.subscribers),
            Arc::clone(&self.running),
            Arc::clone(&self.open),
        )));

        info!(
            "[MythTV] Event listener started ({:?} events)",
            self.conn.event_mode()
        );
        Ok(())
    }

    /// Stop the receive loop and close the connection. Safe to repeat.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.conn.close().await;

        if let Some(mut task) = self.task.take() {
            // The backend hangs up after DONE, which ends the pending read.
            if tokio::time::timeout(self.stop_grace, &mut task).await.is_err() {
                debug!("[MythTV] Event task did not exit in time, aborting");
                task.abort();
            }
            info!("[MythTV] Event listener stopped");
        }
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn receive_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    subscribers: Arc<Subscribers>,
    running: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) && open.load(Ordering::SeqCst) {
        let fields = match reader.read_frame().await {
            Ok(fields) => fields,
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    warn!("[MythTV] Event connection lost: {}", e);
                } else {
                    debug!("[MythTV] Event connection closed: {}", e);
                }
                break;
            }
        };

        if fields.first().map(String::as_str) != Some(BACKEND_MESSAGE) {
            debug!("[MythTV] Ignoring non-event frame: {}", fields.join(" "));
            continue;
        }

        match decode_event(&fields) {
            Ok(event) => {
                debug!("[MythTV] Event {} {:?}", event.name, event.args);
                subscribers.broadcast(&event);
            }
            Err(e) => info!("[MythTV] Skipping event frame: {}", e),
        }
    }
    open.store(false, Ordering::SeqCst);
}
