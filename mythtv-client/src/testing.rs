//! Scripted in-process backend for tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mythtv_protocol::{encode_frame, join_fields, protocol_token};

use crate::client::connection::{ConnectionConfig, FrameReader};

/// Canned replies for one mock backend.
#[derive(Debug, Clone)]
pub struct Script {
    pub version: u32,
    pub announce_reply: String,
    pub free_inputs: String,
    pub spawn_reply: String,
    pub stop_reply: String,
    /// Sizes returned by successive storage group queries; the last repeats.
    pub sg_sizes: Vec<u64>,
    pub file_name: String,
    pub storage_group: String,
    pub host_name: String,
    pub dir_name: String,
}

impl Script {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            announce_reply: "OK".to_string(),
            free_inputs: join_fields(&["DVB1", "1", "5", "1001", "1", "0", "0", "0", "0", "0"]),
            spawn_reply: "OK".to_string(),
            stop_reply: "OK".to_string(),
            sg_sizes: vec![4096],
            file_name: "5_20240101120000.ts".to_string(),
            storage_group: "LiveTV".to_string(),
            host_name: "backend1".to_string(),
            dir_name: "/var/lib/mythtv/livetv".to_string(),
        }
    }
}

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Default)]
struct State {
    connections: Vec<Vec<String>>,
    /// Hang-up switch and liveness flag per accepted connection.
    hangups: Vec<CancellationToken>,
    live: Vec<bool>,
    monitors: Vec<SharedWriter>,
    sg_queries: usize,
}

/// Backend listening on an ephemeral localhost port.
pub struct MockBackend {
    port: u16,
    state: Arc<Mutex<State>>,
    accept_task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let script = Arc::new(script);

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let hangup = CancellationToken::new();
                let index = {
                    let mut state = accept_state.lock();
                    state.connections.push(Vec::new());
                    state.hangups.push(hangup.clone());
                    state.live.push(true);
                    state.connections.len() - 1
                };
                let state = Arc::clone(&accept_state);
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    serve(stream, index, Arc::clone(&state), script, hangup).await;
                    state.lock().live[index] = false;
                });
            }
        });

        Self {
            port,
            state,
            accept_task,
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            client_name: "mythtv-live".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn commands_on(&self, connection: usize) -> Vec<String> {
        self.state.lock().connections[connection].clone()
    }

    pub fn all_commands(&self) -> Vec<String> {
        self.state.lock().connections.concat()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.all_commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn sg_queries(&self) -> usize {
        self.state.lock().sg_queries
    }

    /// Wait until a command starting with `prefix` has been received.
    pub async fn wait_for_command(&self, prefix: &str) {
        for _ in 0..500 {
            if self.count_commands(prefix) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend never received {prefix:?}");
    }

    /// Event monitors announced and not yet gone.
    pub fn monitor_count(&self) -> usize {
        self.state.lock().monitors.len()
    }

    pub async fn wait_for_monitors(&self, count: usize) {
        for _ in 0..500 {
            if self.monitor_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} monitors, have {}", self.monitor_count());
    }

    /// Drop connection `index` without a reply, as a crashed backend would.
    pub async fn hang_up(&self, index: usize) {
        let hangup = self.state.lock().hangups[index].clone();
        hangup.cancel();
        self.wait_until_closed(index).await;
    }

    /// Drop every connection registered as an event monitor.
    pub async fn hang_up_monitors(&self) {
        let indices: Vec<usize> = {
            let state = self.state.lock();
            (0..state.connections.len())
                .filter(|&i| state.live[i])
                .filter(|&i| {
                    state.connections[i]
                        .iter()
                        .any(|c| c.starts_with("ANN Monitor") && !c.ends_with(" 0"))
                })
                .collect()
        };
        for index in indices {
            self.hang_up(index).await;
        }
    }

    async fn wait_until_closed(&self, index: usize) {
        for _ in 0..500 {
            if !self.state.lock().live[index] {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection {index} never closed");
    }

    /// Push an event frame to every registered monitor.
    pub async fn push_event(&self, payload: &str) {
        let monitors = self.state.lock().monitors.clone();
        let frame = encode_frame(payload).unwrap();
        for writer in monitors {
            let _ = writer.lock().await.write_all(&frame).await;
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    index: usize,
    state: Arc<Mutex<State>>,
    script: Arc<Script>,
    hangup: CancellationToken,
) {
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read);
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(write));

    loop {
        let fields = tokio::select! {
            biased;
            _ = hangup.cancelled() => {
                state.lock().monitors.retain(|w| !Arc::ptr_eq(w, &writer));
                let _ = writer.lock().await.shutdown().await;
                return;
            }
            frame = reader.read_frame() => match frame {
                Ok(fields) => fields,
                Err(_) => break,
            },
        };
        let command = join_fields(&fields);
        state.lock().connections[index].push(command.clone());

        let verb = fields.first().cloned().unwrap_or_default();
        let response = if verb.starts_with("MYTH_PROTO_VERSION") {
            let version = script.version;
            let expected = format!(
                "MYTH_PROTO_VERSION {} {}",
                version,
                protocol_token(version).unwrap_or_default()
            );
            if verb == expected {
                join_fields(&["ACCEPT".to_string(), version.to_string()])
            } else {
                reply(&writer, &join_fields(&["REJECT".to_string(), version.to_string()])).await;
                return;
            }
        } else if verb.starts_with("ANN ") {
            let code = verb.rsplit(' ').next().unwrap_or("0");
            if verb.starts_with("ANN Monitor") && code != "0" && script.announce_reply == "OK" {
                state.lock().monitors.push(Arc::clone(&writer));
            }
            script.announce_reply.clone()
        } else if verb == "DONE" {
            state.lock().monitors.retain(|w| !Arc::ptr_eq(w, &writer));
            return;
        } else if verb == "GET_FREE_INPUT_INFO 0" {
            script.free_inputs.clone()
        } else if verb.starts_with("QUERY_RECORDER") {
            match fields.get(1).map(String::as_str) {
                Some("SPAWN_LIVETV") => script.spawn_reply.clone(),
                Some("STOP_LIVETV") => script.stop_reply.clone(),
                Some("GET_CURRENT_RECORDING") => program_reply(&script),
                _ => "UNKNOWN_COMMAND".to_string(),
            }
        } else if verb == "QUERY_SG_FILEQUERY" {
            let size = {
                let mut state = state.lock();
                let i = state.sg_queries.min(script.sg_sizes.len() - 1);
                state.sg_queries += 1;
                script.sg_sizes[i]
            };
            let path = format!("{}/{}", script.dir_name, script.file_name);
            join_fields(&[path, "1704110400".to_string(), size.to_string()])
        } else {
            "UNKNOWN_COMMAND".to_string()
        };

        reply(&writer, &response).await;
    }
}

async fn reply(writer: &SharedWriter, payload: &str) {
    let frame = encode_frame(payload).unwrap();
    let _ = writer.lock().await.write_all(&frame).await;
}

fn program_reply(script: &Script) -> String {
    let mut fields = vec!["0".to_string(); 42];
    fields[0] = "Live News".to_string();
    fields[1] = String::new();
    fields[2] = "Breaking".to_string();
    fields[7] = "News".to_string();
    fields[12] = script.file_name.clone();
    fields[14] = "1704110400".to_string();
    fields[15] = "1704114000".to_string();
    fields[17] = script.host_name.clone();
    fields[41] = script.storage_group.clone();
    join_fields(&fields)
}
