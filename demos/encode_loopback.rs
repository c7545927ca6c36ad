//! Example: encode pipeline on the loopback device
//!
//! Runs a short sequence through every codec and prints the packets in
//! output order. The loopback device echoes the packed headers it receives
//! as coded data, so the output files hold the headers the crate wrote.

use std::fs::File;
use std::io::Write;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use vaforge::{EncodeConfig, Encoder, InputFrame, LoopbackDevice, SurfaceId};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FRAMES: u32 = 16;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    let configs = [
        ("h264", EncodeConfig::h264(WIDTH, HEIGHT).with_b_frames(2)),
        ("h265", EncodeConfig::h265(WIDTH, HEIGHT).with_b_frames(3).with_b_depth(2)),
        ("av1", EncodeConfig::av1(WIDTH, HEIGHT).with_qp(100)),
        ("mpeg2", EncodeConfig::mpeg2(WIDTH, HEIGHT).with_bitrate(2_000_000)),
        ("vp8", EncodeConfig::vp8(WIDTH, HEIGHT)),
        ("vp9", EncodeConfig::vp9(WIDTH, HEIGHT).with_b_frames(2)),
    ];

    for (name, config) in configs {
        println!("{name}: {WIDTH}x{HEIGHT}, {FRAMES} frames");
        let device = LoopbackDevice::new().with_attributes(LoopbackDevice::full_attributes());
        let mut encoder = Encoder::new(device, config)?;

        let mut output = File::create(format!("output.{name}"))?;
        if let Some(extradata) = encoder.extradata() {
            println!("  extradata: {} bytes", extradata.len());
        }

        let mut packets = Vec::new();
        for i in 0..FRAMES {
            packets.extend(encoder.encode(InputFrame::new(SurfaceId(i), i as i64))?);
        }
        packets.extend(encoder.flush()?);

        let mut total_bytes = 0;
        for packet in &packets {
            total_bytes += packet.data.len();
            output.write_all(&packet.data)?;
            println!(
                "  pts={:<2} dts={:<3}: {:>4} bytes, {:?}{}",
                packet.pts,
                packet.dts,
                packet.data.len(),
                packet.picture_type,
                if packet.is_key_frame { " [KEY]" } else { "" }
            );
        }
        println!(
            "  {} packets, {} bytes, {} submissions\n",
            packets.len(),
            total_bytes,
            encoder.device().submissions().len()
        );
    }

    Ok(())
}
