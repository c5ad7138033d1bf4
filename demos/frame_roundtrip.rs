//! Show the wire format: encode samples into length-prefixed frames, hex-dump
//! them, and decode them back.
//!
//! Usage:
//!   cargo run --example frame_roundtrip

use eis_rig::framing;
use eis_rig::ImpedanceSample;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let samples = vec![
        ImpedanceSample {
            frequency: 10.0,
            z_real: 817.3,
            z_imag_neg: 245.1,
        },
        ImpedanceSample {
            frequency: 7.943,
            z_real: 840.9,
            z_imag_neg: 260.4,
        },
    ];

    // streaming granularity: one frame per accepted sample
    for sample in &samples {
        let frame = framing::encode_rows(std::slice::from_ref(sample))?;
        println!("frame ({} bytes): {}", frame.len(), hex(&frame));
    }

    // batch granularity: the whole buffer in one frame
    let batch = framing::encode_rows(&samples)?;
    println!("\nbatch frame ({} bytes): {}", batch.len(), hex(&batch));

    let decoded = framing::read_frame(&mut batch.as_slice())?;
    println!("\ndecoded {} rows:", decoded.len());
    for row in &decoded {
        println!(
            "  {:>8.3} Hz  Z' = {:>8.2}  -Z'' = {:>8.2}",
            row.frequency, row.z_real, row.z_imag_neg
        );
    }

    assert_eq!(decoded, samples);
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
