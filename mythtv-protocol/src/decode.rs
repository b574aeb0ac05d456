//! Decoders mapping backend field lists into typed records.
//!
//! All functions are pure: they take the fields of one response and, where
//! the layout depends on it, the negotiated protocol version.

use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone};

use crate::error::ProtocolError;
use crate::types::{
    BackendEvent, BackendMessage, Input, InputLayout, Program, StorageGroupFile,
};

/// Minimum number of fields in a program info response.
pub const PROGRAM_INFO_FIELDS: usize = 42;

/// Number of fields in a storage group file query response.
pub const SG_FILE_FIELDS: usize = 3;

fn field<'a>(fields: &'a [String], index: usize) -> Result<&'a str, ProtocolError> {
    fields
        .get(index)
        .map(String::as_str)
        .ok_or(ProtocolError::MissingField {
            index,
            len: fields.len(),
        })
}

fn parse_field<T: FromStr>(
    fields: &[String],
    index: usize,
    name: &'static str,
) -> Result<T, ProtocolError> {
    let raw = field(fields, index)?;
    raw.trim().parse().map_err(|_| ProtocolError::InvalidField {
        name,
        value: raw.to_string(),
    })
}

/// Convert Unix epoch seconds into local time.
pub fn epoch_to_local(secs: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(secs, 0).single()
}

fn parse_time(fields: &[String], index: usize, name: &'static str) -> Result<DateTime<Local>, ProtocolError> {
    let secs: i64 = parse_field(fields, index, name)?;
    epoch_to_local(secs).ok_or_else(|| ProtocolError::InvalidField {
        name,
        value: secs.to_string(),
    })
}

/// Decode a `GET_FREE_INPUT_INFO` reply.
///
/// An empty field list means no tuner is free. A list that is not a whole
/// number of tuner records means the layout does not match the version.
pub fn decode_inputs(fields: &[String], version: u32) -> Result<Vec<Input>, ProtocolError> {
    let layout = InputLayout::for_version(version);
    let group = layout.group_size();

    if fields.len() % group != 0 {
        return Err(ProtocolError::FieldCount {
            group,
            actual: fields.len(),
        });
    }

    fields
        .chunks_exact(group)
        .map(|chunk| decode_input(chunk, layout))
        .collect()
}

fn decode_input(chunk: &[String], layout: InputLayout) -> Result<Input, ProtocolError> {
    let input_name = field(chunk, 0)?.to_string();
    let source_id = parse_field(chunk, 1, "source id")?;
    let input_id = parse_field(chunk, 2, "input id")?;

    let (card_id, mplex_id, live_tv_order) = match layout {
        InputLayout::V87 | InputLayout::V89 => (
            parse_field(chunk, 3, "card id")?,
            parse_field(chunk, 4, "mplex id")?,
            parse_field(chunk, 5, "live tv order")?,
        ),
        InputLayout::V90 => (
            input_id,
            parse_field(chunk, 4, "mplex id")?,
            parse_field(chunk, 5, "live tv order")?,
        ),
        InputLayout::V91 => (
            input_id,
            parse_field(chunk, 3, "mplex id")?,
            parse_field(chunk, 4, "live tv order")?,
        ),
    };

    Ok(Input {
        input_name,
        source_id,
        input_id,
        card_id,
        mplex_id,
        live_tv_order,
    })
}

/// Decode a program info response (`GET_CURRENT_RECORDING`).
pub fn decode_program(fields: &[String]) -> Result<Program, ProtocolError> {
    if fields.len() < PROGRAM_INFO_FIELDS {
        return Err(ProtocolError::MissingField {
            index: PROGRAM_INFO_FIELDS - 1,
            len: fields.len(),
        });
    }

    Ok(Program {
        title: field(fields, 0)?.to_string(),
        subtitle: field(fields, 1)?.to_string(),
        description: field(fields, 2)?.to_string(),
        season: parse_field(fields, 3, "season")?,
        episode: parse_field(fields, 4, "episode")?,
        category: field(fields, 7)?.to_string(),
        file_name: field(fields, 12)?.to_string(),
        file_size: parse_field(fields, 13, "file size")?,
        start_time: parse_time(fields, 14, "start time")?,
        end_time: parse_time(fields, 15, "end time")?,
        host_name: field(fields, 17)?.to_string(),
        storage_group: field(fields, 41)?.to_string(),
    })
}

/// Decode a `QUERY_SG_FILEQUERY` reply.
///
/// The reply only carries the path, modification time and size; the host
/// and group come from the request.
pub fn decode_storage_group_file(
    fields: &[String],
    host_name: &str,
    storage_group: &str,
) -> Result<StorageGroupFile, ProtocolError> {
    if fields.len() < SG_FILE_FIELDS {
        return Err(ProtocolError::MissingField {
            index: SG_FILE_FIELDS - 1,
            len: fields.len(),
        });
    }

    Ok(StorageGroupFile {
        file_name: field(fields, 0)?.to_string(),
        storage_group: storage_group.to_string(),
        host_name: host_name.to_string(),
        last_modified: parse_time(fields, 1, "last modified")?,
        size: parse_field(fields, 2, "size")?,
    })
}

/// Decode an asynchronous event frame.
///
/// Field 0 is the `BACKEND_MESSAGE` marker, field 1 carries the message
/// name followed by space separated arguments, and any further fields are
/// extra arguments.
pub fn decode_event(fields: &[String]) -> Result<BackendEvent, ProtocolError> {
    let message = fields.get(1).map(|s| s.trim()).unwrap_or_default();
    if message.is_empty() {
        return Err(ProtocolError::EmptyEvent);
    }

    let mut tokens = message.split(' ').filter(|t| !t.is_empty());
    let name_token = tokens.next().ok_or(ProtocolError::EmptyEvent)?;
    let name = BackendMessage::from_str(name_token)
        .map_err(|_| ProtocolError::UnknownBackendMessage(name_token.to_string()))?;

    let args = tokens
        .map(str::to_string)
        .chain(fields.iter().skip(2).cloned())
        .collect();

    Ok(BackendEvent { name, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::split_fields;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn numeric_fields(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_decode_inputs_field_count_property() {
        for (version, group) in [(88u32, 11usize), (89, 12), (90, 12), (91, 10)] {
            for n in 0..=(group * 3 + 1) {
                let result = decode_inputs(&numeric_fields(n), version);
                if n % group == 0 {
                    assert_eq!(result.unwrap().len(), n / group, "version {version}, {n} fields");
                } else {
                    assert_eq!(
                        result,
                        Err(ProtocolError::FieldCount { group, actual: n }),
                        "version {version}, {n} fields"
                    );
                }
            }
        }
    }

    #[test]
    fn test_decode_inputs_v91_layout() {
        let fields = strings(&["DVB1", "1", "5", "1001", "1", "0", "0", "0", "0", "0"]);
        let inputs = decode_inputs(&fields, 91).unwrap();
        assert_eq!(
            inputs,
            vec![Input {
                input_name: "DVB1".into(),
                source_id: 1,
                input_id: 5,
                card_id: 5,
                mplex_id: 1001,
                live_tv_order: 1,
            }]
        );
    }

    #[test]
    fn test_decode_inputs_v90_card_aliases_input() {
        let fields = strings(&["HDHR", "2", "7", "99", "1002", "3", "0", "0", "0", "0", "0", "0"]);
        let input = &decode_inputs(&fields, 90).unwrap()[0];
        assert_eq!(input.card_id, 7);
        assert_eq!(input.mplex_id, 1002);
        assert_eq!(input.live_tv_order, 3);
    }

    #[test]
    fn test_decode_inputs_v89_explicit_card() {
        let fields = strings(&["HDHR", "2", "7", "4", "1002", "3", "0", "0", "0", "0", "0", "0"]);
        let input = &decode_inputs(&fields, 89).unwrap()[0];
        assert_eq!(input.input_id, 7);
        assert_eq!(input.card_id, 4);
    }

    #[test]
    fn test_decode_inputs_invalid_number() {
        let mut fields = numeric_fields(10);
        fields[1] = "abc".into();
        assert!(matches!(
            decode_inputs(&fields, 91),
            Err(ProtocolError::InvalidField { name: "source id", .. })
        ));
    }

    fn program_fields() -> Vec<String> {
        let mut fields = vec![String::new(); PROGRAM_INFO_FIELDS];
        fields[0] = "News".into();
        fields[1] = "Evening".into();
        fields[2] = "Daily news".into();
        fields[3] = "2".into();
        fields[4] = "14".into();
        fields[7] = "News".into();
        fields[12] = "1001_20240101120000.ts".into();
        fields[13] = "0".into();
        fields[14] = "1704110400".into();
        fields[15] = "1704114000".into();
        fields[17] = "backend1".into();
        fields[41] = "LiveTV".into();
        fields
    }

    #[test]
    fn test_decode_program() {
        let program = decode_program(&program_fields()).unwrap();
        assert_eq!(program.title, "News");
        assert_eq!(program.season, 2);
        assert_eq!(program.episode, 14);
        assert_eq!(program.file_name, "1001_20240101120000.ts");
        assert_eq!(program.host_name, "backend1");
        assert_eq!(program.storage_group, "LiveTV");
        assert_eq!(program.start_time.timestamp(), 1704110400);
        assert_eq!((program.end_time - program.start_time).num_seconds(), 3600);
        assert!(program.is_live_tv());
    }

    #[test]
    fn test_decode_program_too_short() {
        let fields = numeric_fields(20);
        assert!(matches!(
            decode_program(&fields),
            Err(ProtocolError::MissingField { len: 20, .. })
        ));
    }

    #[test]
    fn test_decode_storage_group_file() {
        let fields = split_fields("/var/lib/mythtv/livetv/1001.ts[]:[]1704110400[]:[]188000");
        let file = decode_storage_group_file(&fields, "backend1", "LiveTV").unwrap();
        assert_eq!(file.file_name, "/var/lib/mythtv/livetv/1001.ts");
        assert_eq!(file.storage_group, "LiveTV");
        assert_eq!(file.host_name, "backend1");
        assert_eq!(file.size, 188000);
        assert_eq!(file.last_modified.timestamp(), 1704110400);
    }

    #[test]
    fn test_decode_storage_group_file_missing() {
        let fields = split_fields("EMPTY LIST");
        assert!(decode_storage_group_file(&fields, "h", "g").is_err());
    }

    #[test]
    fn test_decode_event() {
        let fields = split_fields("BACKEND_MESSAGE[]:[]LIVETV_CHAIN UPDATE live-host-2024[]:[]empty");
        let event = decode_event(&fields).unwrap();
        assert_eq!(event.name, BackendMessage::LivetvChain);
        assert_eq!(event.args, vec!["UPDATE", "live-host-2024", "empty"]);
    }

    #[test]
    fn test_decode_event_case_insensitive_name() {
        let fields = split_fields("BACKEND_MESSAGE[]:[]update_file_size 1001 2024 4096");
        let event = decode_event(&fields).unwrap();
        assert_eq!(event.name, BackendMessage::UpdateFileSize);
        assert_eq!(event.args, vec!["1001", "2024", "4096"]);
    }

    #[test]
    fn test_decode_event_unknown_is_recoverable() {
        let fields = split_fields("BACKEND_MESSAGE[]:[]ASK_RECORDING 3 0 0");
        let err = decode_event(&fields).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownBackendMessage("ASK_RECORDING".into()));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_decode_event_empty() {
        assert_eq!(decode_event(&[]), Err(ProtocolError::EmptyEvent));
        assert_eq!(
            decode_event(&strings(&["BACKEND_MESSAGE", "  "])),
            Err(ProtocolError::EmptyEvent)
        );
    }
}
