use std::collections::VecDeque;

use bytes::Bytes;
use deku::prelude::*;
use futures::StreamExt;
use rmpv::Value;

use scansegment::compact::{COMMAND_ID_MEASUREMENT, CompactHeader, ModuleMetadata};
use scansegment::envelope::{STX, TELEGRAM_CRC};
use scansegment::receiver::{CompactReceiver, MsgpackReceiver};
use scansegment::transport::{Transport, TransportError};

/// Hands out a fixed script of chunks, then reports an exhausted transport.
struct ScriptedTransport {
    chunks: VecDeque<Bytes>,
    counter: u64,
}

impl ScriptedTransport {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        ScriptedTransport {
            chunks: chunks.into_iter().map(Bytes::from).collect(),
            counter: 0,
        }
    }
}

impl Transport for ScriptedTransport {
    async fn receive_new_scan_segment(&mut self) -> (Bytes, String) {
        match self.chunks.pop_front() {
            Some(chunk) => {
                self.counter += 1;
                (chunk, "192.168.0.100:2115".to_owned())
            }
            None => (Bytes::new(), String::new()),
        }
    }

    fn last_error(&self) -> Option<&TransportError> {
        None
    }

    fn data_counter(&self) -> u64 {
        self.counter
    }
}

/// One module, one layer, two beams, one echo, distances only.
fn build_compact_telegram(telegram_counter: u64, frame_number: u64, segment_counter: u64) -> Vec<u8> {
    let meta = ModuleMetadata {
        segment_counter,
        frame_number,
        sender_id: 555,
        num_layers: 1,
        num_beams: 2,
        num_echos: 1,
        timestamp_start: vec![10],
        timestamp_stop: vec![20],
        phi: vec![0.0],
        theta_start: vec![0.0],
        theta_stop: vec![0.1],
        distance_scaling_factor: 1.0,
        next_module_size: 0,
        availability: 1,
        data_content_echos: 0x01,
        data_content_beams: 0x00,
        reserved: 0,
    };
    let mut module = meta.to_bytes().unwrap();
    module.extend_from_slice(&123u16.to_le_bytes());
    module.extend_from_slice(&456u16.to_le_bytes());

    let header = CompactHeader {
        command_id: COMMAND_ID_MEASUREMENT,
        telegram_counter,
        timestamp_transmit: 1,
        version: 4,
        first_module_size: module.len() as u32,
    };
    let mut telegram = header.to_bytes().unwrap();
    telegram.extend_from_slice(&module);
    let crc = TELEGRAM_CRC.checksum(&telegram);
    telegram.extend_from_slice(&crc.to_le_bytes());
    telegram
}

fn tagged_map(entries: Vec<(i64, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(tag, value)| (Value::from(tag), value))
            .collect(),
    )
}

fn f32_channel(values: &[f32]) -> Value {
    let mut bytes = Vec::new();
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    tagged_map(vec![
        (0x12, Value::from(values.len() as u64)), // numOfElems
        (0x11, Value::Binary(bytes)),             // data
    ])
}

fn u16_channel(values: &[u16]) -> Value {
    let mut bytes = Vec::new();
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    tagged_map(vec![
        (0x12, Value::from(values.len() as u64)),
        (0x11, Value::Binary(bytes)),
    ])
}

/// One layer, two beams, one echo.
fn build_msgpack_telegram(telegram_counter: u64, frame_number: u64, segment_counter: u64) -> Vec<u8> {
    let scan_data = tagged_map(vec![
        (0x71, Value::from(10u64)),  // TimestampStart
        (0x72, Value::from(20u64)),  // TimestampStop
        (0x73, Value::F64(0.0)),     // ThetaStart
        (0x74, Value::F64(0.1)),     // ThetaStop
        (0x75, Value::from(1u64)),   // ScanNumber
        (0x76, Value::from(0u64)),   // ModuleID
        (0x77, Value::from(2u64)),   // BeamCount
        (0x78, Value::from(1u64)),   // EchoCount
        (0x51, f32_channel(&[0.5, 0.5])), // ChannelPhi
        (0x50, f32_channel(&[-0.1, 0.1])), // ChannelTheta
        (0x52, Value::Array(vec![f32_channel(&[1.0, 2.0])])), // DistValues
        (0x53, Value::Array(vec![u16_channel(&[100, 200])])), // RssiValues
    ]);
    let scan = tagged_map(vec![(0x10, Value::from(0x70)), (0x11, scan_data)]);
    let data = tagged_map(vec![
        (0xB0, Value::from(telegram_counter)),
        (0xB1, Value::from(2u64)),
        (0x93, Value::Boolean(true)),
        (0x94, Value::from(555u64)),
        (0x92, Value::from(frame_number)),
        (0x91, Value::from(segment_counter)),
        (0xA0, Value::Array(vec![Value::from(1u64)])),
        (0x96, Value::Array(vec![scan])),
    ]);
    let tree = tagged_map(vec![(0x10, Value::from(0x90)), (0x11, data)]);

    let mut buffer = Vec::new();
    rmpv::encode::write_value(&mut buffer, &tree).unwrap();
    let mut telegram = STX.to_vec();
    telegram.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
    telegram.extend_from_slice(&buffer);
    telegram.extend_from_slice(&TELEGRAM_CRC.checksum(&buffer).to_le_bytes());
    telegram
}

#[tokio::test]
async fn test_compact_receiver_skips_corrupted_telegrams() {
    let valid1 = build_compact_telegram(1, 100, 0);
    let mut corrupted = build_compact_telegram(2, 100, 1);
    corrupted[40] ^= 0x01;
    let valid2 = build_compact_telegram(3, 100, 2);

    let transport = ScriptedTransport::new(vec![valid1, corrupted, valid2]);
    let mut receiver = CompactReceiver::new(transport);
    let (segments, frame_numbers, segment_counters) = receiver.receive_segments(10).await;

    assert_eq!(segments.len(), 2);
    assert_eq!(frame_numbers, vec![100, 100]);
    assert_eq!(segment_counters, vec![0, 2]);
    assert_eq!(segments[0].telegram_counter, 1);
    assert_eq!(segments[1].telegram_counter, 3);
    assert_eq!(segments[0].modules[0].segment_data[0].distance[0], vec![123.0, 456.0]);
    assert_eq!(receiver.transport().data_counter(), 3);
    receiver.close_connection();
}

#[tokio::test]
async fn test_compact_receiver_stops_at_requested_count() {
    let chunks = (0..5)
        .map(|counter| build_compact_telegram(counter, counter, counter))
        .collect();
    let transport = ScriptedTransport::new(chunks);
    let mut receiver = CompactReceiver::new(transport);
    let (segments, frame_numbers, segment_counters) = receiver.receive_segments(3).await;

    assert_eq!(segments.len(), 3);
    assert_eq!(frame_numbers, vec![0, 1, 2]);
    assert_eq!(segment_counters, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_msgpack_receiver_skips_garbage() {
    let valid1 = build_msgpack_telegram(1, 7, 0);
    let valid2 = build_msgpack_telegram(2, 7, 1);
    let transport =
        ScriptedTransport::new(vec![valid1, b"not a telegram".to_vec(), valid2]);
    let mut receiver = MsgpackReceiver::new(transport);
    let (segments, frame_numbers, segment_counters) = receiver.receive_segments(10).await;

    assert_eq!(segments.len(), 2);
    assert_eq!(frame_numbers, vec![7, 7]);
    assert_eq!(segment_counters, vec![0, 1]);
    assert_eq!(segments[0].layers.len(), 1);
    assert_eq!(segments[0].layers[0].phi, 0.5);
    assert_eq!(
        segments[0].layers[0].segment_data.distance,
        vec![vec![1.0, 2.0]]
    );
}

#[tokio::test]
async fn test_receiver_as_stream() {
    let chunks = (0..3)
        .map(|counter| build_compact_telegram(counter, counter, counter))
        .collect();
    let transport = ScriptedTransport::new(chunks);
    let mut receiver = CompactReceiver::new(transport);

    let telegram_counters: Vec<u64> = receiver
        .as_stream()
        .map(|segment| segment.telegram_counter)
        .collect()
        .await;
    assert_eq!(telegram_counters, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_segments_serialize_to_json() {
    let telegram = build_compact_telegram(1, 100, 0);
    let transport = ScriptedTransport::new(vec![telegram]);
    let mut receiver = CompactReceiver::new(transport);
    let (segments, _, _) = receiver.receive_segments(1).await;

    let json = serde_json::to_value(&segments[0]).unwrap();
    assert_eq!(json["telegram_counter"], 1);
    assert_eq!(json["modules"][0]["frame_number"], 100);
    assert_eq!(json["modules"][0]["segment_data"][0]["distance"][0][1], 456.0);
}
