//! MSGPACK format telegram parsing. The payload is a self-describing map
//! with single byte keyword tags as keys; after tag rewriting the segment
//! and its scan layers are extracted by shape.

use std::path::Path;

use rmpv::Value;
use serde::Serialize;
use thiserror::Error;

use crate::compact::SegmentData;
use crate::decode::{self, DecodeError};
use crate::envelope::{self, EnvelopeError};
use crate::keywords::{self, KeywordError};

#[derive(Debug, Error)]
pub enum MsgpackParseError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("malformed MSGPACK buffer: {0}")]
    Malformed(#[from] rmpv::decode::Error),
    #[error(transparent)]
    Keyword(#[from] KeywordError),
    #[error(transparent)]
    Channel(#[from] DecodeError),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("unexpected type for '{field}', expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },
    #[error("expected exactly one properties channel, got {0}")]
    PropertiesChannelCount(usize),
    #[error("channel '{0}' holds no elements")]
    EmptyChannel(&'static str),
}

/// A single scan layer of a MSGPACK segment. Phi is constant within a layer
/// and taken from the first element of the phi channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub timestamp_start: u64,
    pub timestamp_stop: u64,
    pub theta_start: f64,
    pub theta_stop: f64,
    pub scan_number: u32,
    pub module_id: u32,
    pub beam_count: u32,
    pub echo_count: u32,
    pub phi: f32,
    pub segment_data: SegmentData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsgpackSegment {
    pub telegram_counter: u64,
    pub timestamp_transmit: u64,
    pub availability: u8,
    pub sender_id: u32,
    pub frame_number: u64,
    pub segment_counter: u64,
    pub layer_id: Vec<u32>,
    pub layers: Vec<Layer>,
}

type Map = [(Value, Value)];

fn find<'a>(map: &'a Map, field: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(key, _)| key.as_str() == Some(field))
        .map(|(_, value)| value)
}

fn get<'a>(map: &'a Map, field: &'static str) -> Result<&'a Value, MsgpackParseError> {
    find(map, field).ok_or(MsgpackParseError::MissingField(field))
}

fn as_map<'a>(value: &'a Value, field: &'static str) -> Result<&'a Map, MsgpackParseError> {
    value
        .as_map()
        .map(Vec::as_slice)
        .ok_or(MsgpackParseError::TypeMismatch {
            field,
            expected: "map",
        })
}

fn as_array<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value], MsgpackParseError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or(MsgpackParseError::TypeMismatch {
            field,
            expected: "array",
        })
}

fn get_u64(map: &Map, field: &'static str) -> Result<u64, MsgpackParseError> {
    get(map, field)?
        .as_u64()
        .ok_or(MsgpackParseError::TypeMismatch {
            field,
            expected: "unsigned integer",
        })
}

fn get_u32(map: &Map, field: &'static str) -> Result<u32, MsgpackParseError> {
    u32::try_from(get_u64(map, field)?).map_err(|_| MsgpackParseError::TypeMismatch {
        field,
        expected: "32 bit unsigned integer",
    })
}

fn get_f64(map: &Map, field: &'static str) -> Result<f64, MsgpackParseError> {
    get(map, field)?
        .as_f64()
        .ok_or(MsgpackParseError::TypeMismatch {
            field,
            expected: "float",
        })
}

// The device reports availability as a boolean; older firmware used a flag
// byte. Both are accepted.
fn get_availability(map: &Map) -> Result<u8, MsgpackParseError> {
    let value = get(map, "Availability")?;
    if let Some(flag) = value.as_bool() {
        return Ok(flag as u8);
    }
    value
        .as_u64()
        .and_then(|flags| u8::try_from(flags).ok())
        .ok_or(MsgpackParseError::TypeMismatch {
            field: "Availability",
            expected: "bool or flag byte",
        })
}

fn get_u32_array(map: &Map, field: &'static str) -> Result<Vec<u32>, MsgpackParseError> {
    as_array(get(map, field)?, field)?
        .iter()
        .map(|value| {
            value
                .as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or(MsgpackParseError::TypeMismatch {
                    field,
                    expected: "array of 32 bit unsigned integers",
                })
        })
        .collect()
}

/// A channel is a map carrying `numOfElems` and a binary `data` blob.
fn channel_parts<'a>(
    value: &'a Value,
    field: &'static str,
) -> Result<(u32, &'a [u8]), MsgpackParseError> {
    let channel = as_map(value, field)?;
    let count = get_u32(channel, "numOfElems")?;
    let bytes = get(channel, "data")?
        .as_slice()
        .ok_or(MsgpackParseError::TypeMismatch {
            field: "data",
            expected: "binary",
        })?;
    Ok((count, bytes))
}

fn decode_f32_channel(value: &Value, field: &'static str) -> Result<Vec<f32>, MsgpackParseError> {
    let (count, bytes) = channel_parts(value, field)?;
    Ok(decode::decode_f32_channel(count, bytes)?)
}

fn decode_u16_channel(value: &Value, field: &'static str) -> Result<Vec<u16>, MsgpackParseError> {
    let (count, bytes) = channel_parts(value, field)?;
    Ok(decode::decode_u16_channel(count, bytes)?)
}

fn decode_u8_channel(value: &Value, field: &'static str) -> Result<Vec<u8>, MsgpackParseError> {
    let (count, bytes) = channel_parts(value, field)?;
    Ok(decode::decode_u8_channel(count, bytes)?)
}

/// Validates the telegram envelope and parses the contained segment.
pub fn parse(telegram: &[u8]) -> Result<MsgpackSegment, MsgpackParseError> {
    let payload = envelope::verify_msgpack_telegram(telegram)?;
    parse_payload(payload)
}

/// Parses a MSGPACK payload: the buffer between the length prefix and the
/// trailing CRC.
pub fn parse_payload(payload: &[u8]) -> Result<MsgpackSegment, MsgpackParseError> {
    let mut reader = payload;
    let tree = rmpv::decode::read_value(&mut reader)?;
    let tree = keywords::replace_keywords(tree)?;

    let root = as_map(&tree, "telegram root")?;
    let data = as_map(get(root, "data")?, "data")?;

    let layers = as_array(get(data, "SegmentData")?, "SegmentData")?
        .iter()
        .map(extract_layer)
        .collect::<Result<_, _>>()?;

    Ok(MsgpackSegment {
        telegram_counter: get_u64(data, "TelegramCounter")?,
        timestamp_transmit: get_u64(data, "TimestampTransmit")?,
        availability: get_availability(data)?,
        sender_id: get_u32(data, "SenderId")?,
        frame_number: get_u64(data, "FrameNumber")?,
        segment_counter: get_u64(data, "SegmentCounter")?,
        layer_id: get_u32_array(data, "LayerId")?,
        layers,
    })
}

fn extract_layer(scan: &Value) -> Result<Layer, MsgpackParseError> {
    let scan = as_map(scan, "scan")?;
    let data = as_map(get(scan, "data")?, "data")?;

    // Phi is constant for a single layer, so the very first element is it.
    let phi_channel = decode_f32_channel(get(data, "ChannelPhi")?, "ChannelPhi")?;
    let phi = *phi_channel
        .first()
        .ok_or(MsgpackParseError::EmptyChannel("ChannelPhi"))?;

    let distance = as_array(get(data, "DistValues")?, "DistValues")?
        .iter()
        .map(|channel| decode_f32_channel(channel, "DistValues"))
        .collect::<Result<_, _>>()?;
    let rssi = as_array(get(data, "RssiValues")?, "RssiValues")?
        .iter()
        .map(|channel| decode_u16_channel(channel, "RssiValues"))
        .collect::<Result<_, _>>()?;
    let channel_theta = decode_f32_channel(get(data, "ChannelTheta")?, "ChannelTheta")?;

    let properties = match find(data, "PropertiesValues") {
        None => None,
        Some(value) => {
            let channels = as_array(value, "PropertiesValues")?;
            if channels.len() != 1 {
                return Err(MsgpackParseError::PropertiesChannelCount(channels.len()));
            }
            Some(decode_u8_channel(&channels[0], "PropertiesValues")?)
        }
    };

    Ok(Layer {
        timestamp_start: get_u64(data, "TimestampStart")?,
        timestamp_stop: get_u64(data, "TimestampStop")?,
        theta_start: get_f64(data, "ThetaStart")?,
        theta_stop: get_f64(data, "ThetaStop")?,
        scan_number: get_u32(data, "ScanNumber")?,
        module_id: get_u32(data, "ModuleID")?,
        beam_count: get_u32(data, "BeamCount")?,
        echo_count: get_u32(data, "EchoCount")?,
        phi,
        segment_data: SegmentData {
            distance,
            rssi: Some(rssi),
            channel_theta: Some(channel_theta),
            properties,
        },
    })
}

#[derive(Debug, Error)]
pub enum MsgpackFileError {
    #[error("failed to read MSGPACK file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] MsgpackParseError),
}

/// Reads a MSGPACK formatted binary file holding one telegram and parses it.
pub async fn parse_from_file(path: impl AsRef<Path>) -> Result<MsgpackSegment, MsgpackFileError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(parse(&bytes)?)
}
