//! Wire format definitions for the MythTV backend protocol.
//!
//! This crate defines framing, the protocol version table and the decoders
//! that turn backend responses into typed records. It performs no I/O.
//!
//! # Frame Format
//!
//! ```text
//! +----------+------------------------------+
//! | Length   |           Payload            |
//! | ASCII    | fields joined by "[]:[]"     |
//! +----------+------------------------------+
//! | 8 bytes  |        Length bytes          |
//! ```
//!
//! # Example
//!
//! ```rust
//! use mythtv_protocol::{decode_header, decode_inputs, encode_frame, split_fields, HEADER_SIZE};
//!
//! // Encode a command
//! let frame = encode_frame("GET_FREE_INPUT_INFO 0").unwrap();
//! assert_eq!(decode_header(&frame).unwrap(), Some(21));
//!
//! // Decode a reply negotiated at protocol 91 (10 fields per tuner)
//! let fields = split_fields("DVB1[]:[]1[]:[]5[]:[]1001[]:[]1[]:[]0[]:[]0[]:[]0[]:[]0[]:[]0");
//! let inputs = decode_inputs(&fields, 91).unwrap();
//! assert_eq!(inputs[0].card_id, 5);
//! # let _ = HEADER_SIZE;
//! ```

pub mod codec;
pub mod decode;
pub mod error;
pub mod types;

pub use codec::{decode_header, decode_payload, encode_frame, join_fields, split_fields};
pub use decode::{
    decode_event, decode_inputs, decode_program, decode_storage_group_file, epoch_to_local,
};
pub use error::ProtocolError;
pub use types::{
    latest_protocol_version, normalize_maps, protocol_token, reconcile_maps, AnnounceMode,
    BackendEvent, BackendMessage, EventMode, Input, InputLayout, Program, StorageGroupDir,
    StorageGroupFile, StorageGroupMap, BACKEND_MESSAGE, DEFAULT_PORT, DELIMITER, HEADER_SIZE,
    MAX_FRAME_SIZE, MIN_ANNOUNCE_VERSION, PROTOCOL_TOKENS,
};
