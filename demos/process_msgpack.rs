// Receives scan segments in MSGPACK format and prints a short summary of
// the first few.

use scansegment::msgpack_stream::MsgpackStreamExtractor;
use scansegment::receiver::MsgpackReceiver;
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
) -> (Vec<scansegment::msgpack::MsgpackSegment>, Vec<u64>, Vec<u64>) {
    let mut receiver = MsgpackReceiver::new(transport);
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
        let extractor = MsgpackStreamExtractor::new();
        receive(TcpTransport::connect((IP, PORT), extractor, 1024).await?).await
    };

    println!("received {} segments", segments.len());
    for ((segment, frame_number), segment_counter) in segments
        .iter()
        .zip(&frame_numbers)
        .zip(&segment_counters)
        .take(5)
    {
        let Some(layer) = segment.layers.first() else {
            continue;
        };
        println!(
            "frame {frame_number} segment {segment_counter} phi {:.3} rad \
             beams {} echos {}",
            layer.phi, layer.beam_count, layer.echo_count,
        );
    }
    Ok(())
}
