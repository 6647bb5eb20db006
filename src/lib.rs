//! Decoding of LiDAR scan segment telemetry streamed in the Compact or
//! MSGPACK wire format. Telegrams are recovered from datagram or stream
//! transports, validated against their envelope checksum and parsed into
//! per-module measurement records.

pub mod compact;
pub mod compact_stream;
pub mod decode;
pub mod envelope;
pub mod keywords;
pub mod msgpack;
pub mod msgpack_stream;
pub mod receiver;
pub mod transport;
