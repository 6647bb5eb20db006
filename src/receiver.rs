//! Receives scan segments from a transport until a requested count has been
//! accumulated. Telegrams that fail envelope validation or parsing are
//! logged and skipped; the affected frames are visible to callers only as
//! gaps in the returned counters.

use std::marker::PhantomData;

use futures::Stream;
use log::error;

use crate::compact::{self, CompactParseError, CompactSegment};
use crate::msgpack::{self, MsgpackParseError, MsgpackSegment};
use crate::transport::Transport;

/// One of the two wire formats a sensor can stream.
pub trait TelegramFormat {
    type Segment;
    type Error: std::error::Error;

    /// Validates the telegram envelope and parses the segment within.
    fn parse(telegram: &[u8]) -> Result<Self::Segment, Self::Error>;
    /// Frame the segment belongs to.
    fn frame_number(segment: &Self::Segment) -> u64;
    /// Index of the segment within its frame.
    fn segment_counter(segment: &Self::Segment) -> u64;
}

/// Marker for the Compact wire format.
pub struct Compact;

impl TelegramFormat for Compact {
    type Segment = CompactSegment;
    type Error = CompactParseError;

    fn parse(telegram: &[u8]) -> Result<CompactSegment, CompactParseError> {
        compact::parse(telegram)
    }

    fn frame_number(segment: &CompactSegment) -> u64 {
        segment.frame_number()
    }

    fn segment_counter(segment: &CompactSegment) -> u64 {
        segment.segment_counter()
    }
}

/// Marker for the MSGPACK wire format.
pub struct Msgpack;

impl TelegramFormat for Msgpack {
    type Segment = MsgpackSegment;
    type Error = MsgpackParseError;

    fn parse(telegram: &[u8]) -> Result<MsgpackSegment, MsgpackParseError> {
        msgpack::parse(telegram)
    }

    fn frame_number(segment: &MsgpackSegment) -> u64 {
        segment.frame_number
    }

    fn segment_counter(segment: &MsgpackSegment) -> u64 {
        segment.segment_counter
    }
}

/// Pulls telegrams from a transport, parses them and accumulates the
/// decoded segments.
pub struct Receiver<F: TelegramFormat, T: Transport> {
    transport: T,
    _format: PhantomData<F>,
}

pub type CompactReceiver<T> = Receiver<Compact, T>;
pub type MsgpackReceiver<T> = Receiver<Msgpack, T>;

impl<F: TelegramFormat, T: Transport> Receiver<F, T> {
    pub fn new(transport: T) -> Self {
        Receiver {
            transport,
            _format: PhantomData,
        }
    }

    /// Receives up to `count` segments and returns them together with their
    /// frame numbers and segment counters as three sequences of equal
    /// length, in telegram arrival order. Unparsable telegrams are logged
    /// and skipped. The result holds fewer than `count` entries when the
    /// transport times out or fails; the transport's error accessors tell
    /// which of the two it was.
    pub async fn receive_segments(
        &mut self,
        count: usize,
    ) -> (Vec<F::Segment>, Vec<u64>, Vec<u64>) {
        let mut segments = Vec::with_capacity(count);
        let mut frame_numbers = Vec::with_capacity(count);
        let mut segment_counters = Vec::with_capacity(count);

        while segments.len() < count {
            let (telegram, _sender) = self.transport.receive_new_scan_segment().await;
            if telegram.is_empty() {
                break;
            }
            match F::parse(&telegram) {
                Ok(segment) => {
                    frame_numbers.push(F::frame_number(&segment));
                    segment_counters.push(F::segment_counter(&segment));
                    segments.push(segment);
                }
                Err(err) => error!("skipping unparsable telegram: {err}"),
            }
        }
        (segments, frame_numbers, segment_counters)
    }

    /// The parsed segments as an asynchronous stream. The stream ends when
    /// the transport stops delivering data.
    pub fn as_stream(&mut self) -> impl Stream<Item = F::Segment> + '_ {
        futures::stream::unfold(self, |receiver| async {
            loop {
                let (telegram, _sender) = receiver.transport.receive_new_scan_segment().await;
                if telegram.is_empty() {
                    return None;
                }
                match F::parse(&telegram) {
                    Ok(segment) => return Some((segment, receiver)),
                    Err(err) => error!("skipping unparsable telegram: {err}"),
                }
            }
        })
    }

    /// The underlying transport, for inspecting its error state and data
    /// counter.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Closes the connection by releasing the transport.
    pub fn close_connection(self) {
        drop(self.transport);
    }
}
