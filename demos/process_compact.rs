// Receives scan segments in Compact format and prints a short summary of
// the first few. The received data consists of a list of segments, a list
// of frame numbers and a list of segment counters of the same length.

use scansegment::compact_stream::CompactStreamExtractor;
use scansegment::receiver::CompactReceiver;
use scansegment::transport::{TcpTransport, Transport, UdpTransport};

// Port used for data streaming. Enter the port configured in your device.
const PORT: u16 = 2115;

// If UDP is configured this should be the IP of the receiver.
// If TCP is configured this should be the IP of the sensor.
const IP: &str = "192.168.0.100";

// Transport protocol over which the data arrives, "UDP" or "TCP".
const TRANSPORT_PROTOCOL: &str = "UDP";

async fn receive<T: Transport>(
    transport: T,
) -> (Vec<scansegment::compact::CompactSegment>, Vec<u64>, Vec<u64>) {
    let mut receiver = CompactReceiver::new(transport);
    let result = receiver.receive_segments(200).await;
    receiver.close_connection();
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (segments, frame_numbers, segment_counters) = if TRANSPORT_PROTOCOL == "UDP" {
        receive(UdpTransport::bind((IP, PORT), 65535).await?).await
    } else {
        // See the documentation of the buffer_size argument of the TCP
        // transport for the selection of a suitable value.
        let extractor = CompactStreamExtractor::new();
        receive(TcpTransport::connect((IP, PORT), extractor, 1024).await?).await
    };

    println!("received {} segments", segments.len());
    for ((segment, frame_number), segment_counter) in segments
        .iter()
        .zip(&frame_numbers)
        .zip(&segment_counters)
        .take(5)
    {
        let Some(module) = segment.modules.first() else {
            continue;
        };
        println!(
            "frame {frame_number} segment {segment_counter} start angle {:.3} rad \
             first distance {:?}",
            module.theta_start.first().copied().unwrap_or_default(),
            module.segment_data[0].distance[0].first(),
        );
    }
    Ok(())
}
