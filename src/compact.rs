//! Compact format telegram parsing.
//!
//! A Compact telegram consists of a 32 byte header followed by one or more
//! modules of variable length and a trailing CRC-32. The header stores the
//! size of the first module and every module stores the size of the module
//! following it in its metadata; a declared size of 0 ends the chain.
//!
//! ```text
//! | Header | Module 1   | Module 2   | ... | CRC |
//! 0       32            X            Y
//!         | Metadata 1 | Beam data 1 | ...
//! ```

use std::path::Path;

use deku::prelude::*;
use log::warn;
use serde::Serialize;
use thiserror::Error;

use crate::decode::{self, DecodeError};
use crate::envelope::{self, EnvelopeError};

/// Command id of Compact measurement data telegrams.
pub const COMMAND_ID_MEASUREMENT: u32 = 1;

/// Size of the telegram header, start marker included.
pub const HEADER_LEN: usize = 32;

const MASK_DISTANCE_AVAILABLE: u8 = 0x01;
const MASK_RSSI_AVAILABLE: u8 = 0x02;
const MASK_PROPERTIES_AVAILABLE: u8 = 0x01;
const MASK_THETA_AVAILABLE: u8 = 0x02;

// Beam angles are transported as u16 according to
// `raw = floor(theta_rad * 5215 + 16384)`.
const THETA_SCALE: f32 = 5215.0;
const THETA_OFFSET: f32 = 16384.0;

fn theta_from_raw(raw: u16) -> f32 {
    (raw as f32 - THETA_OFFSET) / THETA_SCALE
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompactParseError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("failed to decode telegram layout: {0}")]
    Layout(#[from] DekuError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("module {module} declares no distance data (data_content_echos {data_content_echos:#04x})")]
    MissingDistance {
        module: usize,
        data_content_echos: u8,
    },
    #[error("declared module sizes cover {declared} telegram bytes, payload has {actual}")]
    ModuleSizeMismatch { declared: usize, actual: usize },
}

/// Fixed 32 byte telegram header, including the start marker.
#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"\x02\x02\x02\x02")]
pub struct CompactHeader {
    pub command_id: u32,
    pub telegram_counter: u64,
    pub timestamp_transmit: u64,
    pub version: u32,
    pub first_module_size: u32,
}

/// Module metadata: a fixed prefix, per-layer arrays whose length is the
/// number of layers in the module, and a fixed suffix carrying the chain
/// link to the next module.
#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ModuleMetadata {
    pub segment_counter: u64,
    pub frame_number: u64,
    pub sender_id: u32,
    pub num_layers: u32,
    pub num_beams: u32,
    pub num_echos: u32,
    #[deku(count = "num_layers")]
    pub timestamp_start: Vec<u64>,
    #[deku(count = "num_layers")]
    pub timestamp_stop: Vec<u64>,
    #[deku(count = "num_layers")]
    pub phi: Vec<f32>,
    #[deku(count = "num_layers")]
    pub theta_start: Vec<f32>,
    #[deku(count = "num_layers")]
    pub theta_stop: Vec<f32>,
    pub distance_scaling_factor: f32,
    pub next_module_size: u32,
    pub availability: u8,
    pub data_content_echos: u8,
    pub data_content_beams: u8,
    pub reserved: u8,
}

/// Measurement data of one layer: matrices indexed `[echo][beam]` plus
/// per-beam channels. Only distances are mandatory on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentData {
    pub distance: Vec<Vec<f32>>,
    pub rssi: Option<Vec<Vec<u16>>>,
    pub channel_theta: Option<Vec<f32>>,
    pub properties: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactModule {
    pub segment_counter: u64,
    pub frame_number: u64,
    pub sender_id: u32,
    pub num_layers: u32,
    pub num_beams: u32,
    pub num_echos: u32,
    pub timestamp_start: Vec<u64>,
    pub timestamp_stop: Vec<u64>,
    pub phi: Vec<f32>,
    pub theta_start: Vec<f32>,
    pub theta_stop: Vec<f32>,
    pub distance_scaling_factor: f32,
    pub availability: u8,
    pub data_content_echos: u8,
    pub data_content_beams: u8,
    pub has_distance: bool,
    pub has_rssi: bool,
    pub has_properties: bool,
    pub has_theta: bool,
    /// One entry per layer.
    pub segment_data: Vec<SegmentData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactSegment {
    pub command_id: u32,
    pub telegram_counter: u64,
    pub timestamp_transmit: u64,
    pub version: u32,
    pub modules: Vec<CompactModule>,
}

impl CompactSegment {
    /// Frame number of the first module, 0 for a telegram without modules.
    pub fn frame_number(&self) -> u64 {
        self.modules.first().map_or(0, |module| module.frame_number)
    }

    /// Segment counter of the first module, 0 for a telegram without modules.
    pub fn segment_counter(&self) -> u64 {
        self.modules
            .first()
            .map_or(0, |module| module.segment_counter)
    }
}

/// Validates the telegram envelope and parses the contained segment.
pub fn parse(telegram: &[u8]) -> Result<CompactSegment, CompactParseError> {
    let payload = envelope::verify_compact_telegram(telegram)?;
    parse_payload(payload)
}

/// Parses a Compact payload: everything from the start marker through the
/// last module, without the trailing CRC.
pub fn parse_payload(payload: &[u8]) -> Result<CompactSegment, CompactParseError> {
    let (_, header) = CompactHeader::from_bytes((payload, 0))?;

    let mut modules = Vec::new();
    let mut offset = HEADER_LEN;
    let mut next_module_size = header.first_module_size as usize;
    while next_module_size > 0 {
        let end = offset
            .checked_add(next_module_size)
            .filter(|end| *end <= payload.len())
            .ok_or(DecodeError::Truncated {
                offset,
                needed: next_module_size,
                len: payload.len(),
            })?;
        let (module, declared_next) = parse_module(&payload[offset..end], modules.len())?;
        modules.push(module);
        offset = end;
        next_module_size = declared_next as usize;
    }

    if offset != payload.len() {
        return Err(CompactParseError::ModuleSizeMismatch {
            declared: offset,
            actual: payload.len(),
        });
    }

    Ok(CompactSegment {
        command_id: header.command_id,
        telegram_counter: header.telegram_counter,
        timestamp_transmit: header.timestamp_transmit,
        version: header.version,
        modules,
    })
}

fn parse_module(
    data: &[u8],
    module_index: usize,
) -> Result<(CompactModule, u32), CompactParseError> {
    let ((rest, _), meta) = ModuleMetadata::from_bytes((data, 0))?;

    if meta.data_content_echos & MASK_DISTANCE_AVAILABLE == 0 {
        return Err(CompactParseError::MissingDistance {
            module: module_index,
            data_content_echos: meta.data_content_echos,
        });
    }

    let beam_data_offset = data.len() - rest.len();
    let (segment_data, end) = read_beam_data(data, &meta, beam_data_offset)?;
    if end < data.len() {
        warn!(
            "{} unread bytes after beam data of module {module_index}",
            data.len() - end
        );
    }

    let module = CompactModule {
        segment_counter: meta.segment_counter,
        frame_number: meta.frame_number,
        sender_id: meta.sender_id,
        num_layers: meta.num_layers,
        num_beams: meta.num_beams,
        num_echos: meta.num_echos,
        timestamp_start: meta.timestamp_start,
        timestamp_stop: meta.timestamp_stop,
        phi: meta.phi,
        theta_start: meta.theta_start,
        theta_stop: meta.theta_stop,
        distance_scaling_factor: meta.distance_scaling_factor,
        availability: meta.availability,
        data_content_echos: meta.data_content_echos,
        data_content_beams: meta.data_content_beams,
        has_distance: true,
        has_rssi: meta.data_content_echos & MASK_RSSI_AVAILABLE != 0,
        has_properties: meta.data_content_beams & MASK_PROPERTIES_AVAILABLE != 0,
        has_theta: meta.data_content_beams & MASK_THETA_AVAILABLE != 0,
        segment_data,
    };
    Ok((module, meta.next_module_size))
}

/// Reads the beam data block of one module. Values are stored beam by beam;
/// within one beam the layers follow each other, each as a run of all echo
/// distances, then all echo RSSI values, then the optional property byte and
/// the optional theta angle of the beam.
fn read_beam_data(
    data: &[u8],
    meta: &ModuleMetadata,
    mut offset: usize,
) -> Result<(Vec<SegmentData>, usize), DecodeError> {
    let num_beams = meta.num_beams as usize;
    let num_echos = meta.num_echos as usize;
    let has_rssi = meta.data_content_echos & MASK_RSSI_AVAILABLE != 0;
    let has_properties = meta.data_content_beams & MASK_PROPERTIES_AVAILABLE != 0;
    let has_theta = meta.data_content_beams & MASK_THETA_AVAILABLE != 0;

    // Bound the block size up front so declared counts cannot trigger
    // allocations larger than the data backing them.
    let per_beam_layer = 2 * num_echos as u64
        + if has_rssi { 2 * num_echos as u64 } else { 0 }
        + if has_properties { 1 } else { 0 }
        + if has_theta { 2 } else { 0 };
    let required = per_beam_layer * num_beams as u64 * meta.num_layers as u64;
    if required > data.len().saturating_sub(offset) as u64 {
        return Err(DecodeError::Truncated {
            offset,
            needed: required as usize,
            len: data.len(),
        });
    }

    let mut layers: Vec<SegmentData> = (0..meta.num_layers)
        .map(|_| SegmentData {
            distance: vec![vec![0.0; num_beams]; num_echos],
            rssi: has_rssi.then(|| vec![vec![0; num_beams]; num_echos]),
            channel_theta: has_theta.then(|| vec![0.0; num_beams]),
            properties: has_properties.then(|| vec![0; num_beams]),
        })
        .collect();

    for beam_idx in 0..num_beams {
        for layer in layers.iter_mut() {
            for echo_idx in 0..num_echos {
                let (raw, next) = decode::read_u16(data, offset)?;
                layer.distance[echo_idx][beam_idx] = raw as f32 * meta.distance_scaling_factor;
                offset = next;
            }
            if let Some(rssi) = layer.rssi.as_mut() {
                for echo_idx in 0..num_echos {
                    let (raw, next) = decode::read_u16(data, offset)?;
                    rssi[echo_idx][beam_idx] = raw;
                    offset = next;
                }
            }
            if let Some(properties) = layer.properties.as_mut() {
                let (raw, next) = decode::read_u8(data, offset)?;
                properties[beam_idx] = raw;
                offset = next;
            }
            if let Some(theta) = layer.channel_theta.as_mut() {
                let (raw, next) = decode::read_u16(data, offset)?;
                theta[beam_idx] = theta_from_raw(raw);
                offset = next;
            }
        }
    }
    Ok((layers, offset))
}

#[derive(Debug, Error)]
pub enum CompactFileError {
    #[error("failed to read Compact file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] CompactParseError),
}

/// Reads a Compact formatted binary file holding one telegram and parses it.
pub async fn parse_from_file(path: impl AsRef<Path>) -> Result<CompactSegment, CompactFileError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(parse(&bytes)?)
}
