//! Record and enum definitions for the MythTV backend protocol.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Field delimiter used inside every payload.
pub const DELIMITER: &str = "[]:[]";

/// Width of the ASCII length header that precedes every payload.
pub const HEADER_SIZE: usize = 8;

/// Largest payload length that fits in the header.
pub const MAX_FRAME_SIZE: usize = 99_999_999;

/// Versions below this do not understand `ANN`.
pub const MIN_ANNOUNCE_VERSION: u32 = 75;

/// Default port of the backend protocol listener.
pub const DEFAULT_PORT: u16 = 6543;

/// Marker in field 0 of every asynchronous event frame.
pub const BACKEND_MESSAGE: &str = "BACKEND_MESSAGE";

/// Known protocol versions and the token each one expects, highest first.
pub const PROTOCOL_TOKENS: &[(u32, &str)] = &[
    (91, "BuzzOff"),
    (90, "BuzzCut"),
    (89, "BuzzKill"),
    (88, "XmasGift"),
];

/// Look up the handshake token for a protocol version.
pub fn protocol_token(version: u32) -> Option<&'static str> {
    PROTOCOL_TOKENS
        .iter()
        .find(|(v, _)| *v == version)
        .map(|(_, token)| *token)
}

/// Highest protocol version this client can speak.
pub fn latest_protocol_version() -> u32 {
    PROTOCOL_TOKENS
        .iter()
        .map(|(v, _)| *v)
        .max()
        .unwrap_or(0)
}

/// Role a connection declares when announcing itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnounceMode {
    FileTransfer,
    Playback,
    MediaServer,
    Monitor,
    SlaveBackend,
}

impl AnnounceMode {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnounceMode::FileTransfer => "FileTransfer",
            AnnounceMode::Playback => "Playback",
            AnnounceMode::MediaServer => "MediaServer",
            AnnounceMode::Monitor => "Monitor",
            AnnounceMode::SlaveBackend => "SlaveBackend",
        }
    }
}

impl fmt::Display for AnnounceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which asynchronous events the backend should push to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventMode {
    #[default]
    None = 0,
    All = 1,
    ExcludeSystem = 2,
    SystemOnly = 3,
}

impl EventMode {
    /// Numeric code sent in the announce command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Field layout of one tuner entry in a `GET_FREE_INPUT_INFO` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// Protocol 88 and older: 11 fields with an explicit card id.
    V87,
    /// Protocol 89: 12 fields with an explicit card id.
    V89,
    /// Protocol 90: 12 fields, card id is the input id.
    V90,
    /// Protocol 91 and newer: 10 fields, card id is the input id.
    V91,
}

impl InputLayout {
    /// Pick the layout for a negotiated protocol version.
    pub fn for_version(version: u32) -> Self {
        match version {
            v if v >= 91 => InputLayout::V91,
            90 => InputLayout::V90,
            89 => InputLayout::V89,
            _ => InputLayout::V87,
        }
    }

    /// Number of fields per tuner.
    pub fn group_size(self) -> usize {
        match self {
            InputLayout::V87 => 11,
            InputLayout::V89 | InputLayout::V90 => 12,
            InputLayout::V91 => 10,
        }
    }
}

/// A tuner input reported free by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub input_name: String,
    pub source_id: u32,
    pub input_id: u32,
    pub card_id: u32,
    pub mplex_id: u32,
    pub live_tv_order: u32,
}

/// Snapshot of the program a recorder reports as currently recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub season: u32,
    pub episode: u32,
    pub category: String,
    pub file_name: String,
    pub file_size: u64,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub host_name: String,
    pub storage_group: String,
}

impl Program {
    /// True when the recording lives in the LiveTV storage group.
    pub fn is_live_tv(&self) -> bool {
        self.storage_group.eq_ignore_ascii_case("LiveTV")
    }
}

/// A file looked up inside a storage group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageGroupFile {
    /// Full path on the backend host.
    pub file_name: String,
    pub storage_group: String,
    pub host_name: String,
    pub last_modified: DateTime<Local>,
    pub size: u64,
}

/// Directory of a storage group as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageGroupDir {
    pub group_name: String,
    pub dir_name: String,
}

/// Maps a backend storage group directory onto a locally reachable one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageGroupMap {
    pub group_name: String,
    pub dir_name: String,
    pub dir_name_override: String,
}

impl StorageGroupMap {
    pub fn new(
        group_name: impl Into<String>,
        dir_name: impl Into<String>,
        dir_name_override: impl Into<String>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            dir_name: dir_name.into(),
            dir_name_override: dir_name_override.into(),
        }
    }

    /// Rewrite a backend path into the local override directory.
    ///
    /// Returns `None` when the path is not under `dir_name`.
    pub fn remap(&self, path: &str) -> Option<String> {
        let dir = self.dir_name.trim_end_matches('/');
        let rest = path.strip_prefix(dir)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(format!("{}{}", self.dir_name_override.trim_end_matches('/'), rest))
    }
}

/// Strip trailing path separators from every map.
pub fn normalize_maps(maps: &mut [StorageGroupMap]) {
    for map in maps.iter_mut() {
        let dir = map.dir_name.trim_end_matches('/').len();
        map.dir_name.truncate(dir);
        let dir = map.dir_name_override.trim_end_matches('/').len();
        map.dir_name_override.truncate(dir);
    }
}

/// Merge configured maps with the groups the backend currently reports.
///
/// Groups the backend no longer has are dropped, existing overrides are
/// kept, and new groups map onto themselves.
pub fn reconcile_maps(
    configured: Vec<StorageGroupMap>,
    backend: &[StorageGroupDir],
) -> Vec<StorageGroupMap> {
    let mut maps: Vec<StorageGroupMap> = configured
        .into_iter()
        .filter(|m| backend.iter().any(|d| d.group_name == m.group_name))
        .collect();

    for dir in backend {
        if !maps.iter().any(|m| m.group_name == dir.group_name) {
            maps.push(StorageGroupMap::new(
                dir.group_name.clone(),
                dir.dir_name.clone(),
                dir.dir_name.clone(),
            ));
        }
    }

    normalize_maps(&mut maps);
    maps
}

/// Kinds of asynchronous messages the backend pushes to monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMessage {
    ClearSettingsCache,
    CommflagRequest,
    DoneRecording,
    DownloadFile,
    FileClosed,
    FileWritten,
    GeneratedPixmap,
    LivetvChain,
    LivetvWatch,
    MasterUpdateProgInfo,
    RecordingListChange,
    ScheduleChange,
    Signal,
    SystemEvent,
    UpdateFileSize,
    VideoListChange,
}

const BACKEND_MESSAGE_NAMES: &[(BackendMessage, &str)] = &[
    (BackendMessage::ClearSettingsCache, "CLEAR_SETTINGS_CACHE"),
    (BackendMessage::CommflagRequest, "COMMFLAG_REQUEST"),
    (BackendMessage::DoneRecording, "DONE_RECORDING"),
    (BackendMessage::DownloadFile, "DOWNLOAD_FILE"),
    (BackendMessage::FileClosed, "FILE_CLOSED"),
    (BackendMessage::FileWritten, "FILE_WRITTEN"),
    (BackendMessage::GeneratedPixmap, "GENERATED_PIXMAP"),
    (BackendMessage::LivetvChain, "LIVETV_CHAIN"),
    (BackendMessage::LivetvWatch, "LIVETV_WATCH"),
    (BackendMessage::MasterUpdateProgInfo, "MASTER_UPDATE_PROG_INFO"),
    (BackendMessage::RecordingListChange, "RECORDING_LIST_CHANGE"),
    (BackendMessage::ScheduleChange, "SCHEDULE_CHANGE"),
    (BackendMessage::Signal, "SIGNAL"),
    (BackendMessage::SystemEvent, "SYSTEM_EVENT"),
    (BackendMessage::UpdateFileSize, "UPDATE_FILE_SIZE"),
    (BackendMessage::VideoListChange, "VIDEO_LIST_CHANGE"),
];

impl BackendMessage {
    /// Wire name of the message.
    pub fn as_str(&self) -> &'static str {
        BACKEND_MESSAGE_NAMES
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }
}

impl FromStr for BackendMessage {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BACKEND_MESSAGE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(kind, _)| *kind)
            .ok_or(())
    }
}

impl fmt::Display for BackendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded backend event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub name: BackendMessage,
    pub args: Vec<String>,
}
