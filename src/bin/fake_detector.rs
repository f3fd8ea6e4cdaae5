//! fake_detector - stand-in for the people-counting detector.
//!
//! Prints one JSON detection batch per line on stdout, with an optional
//! plain-text diagnostic line on stderr every N batches. Useful for manual
//! runs of `sync_capture` without a camera-side model.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{ErrorKind, Write};
use std::time::Duration;

use detection_sync::{BoundingBox, Detection, DetectionBatch};

#[derive(Parser, Debug)]
#[command(author, version, about = "Emit line-delimited JSON detection batches")]
struct Args {
    /// Delay between batches.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Print a diagnostic line every N batches (0 = never).
    #[arg(long, default_value_t = 0)]
    diagnostic_every: u64,

    /// Exit after this many batches (runs forever when absent).
    #[arg(long)]
    count: Option<u64>,

    /// Label of the drifting box.
    #[arg(long, default_value = "head")]
    label: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut stdout = std::io::stdout().lock();
    let mut emitted = 0u64;
    loop {
        if args.count.is_some_and(|count| emitted >= count) {
            break;
        }
        std::thread::sleep(Duration::from_millis(args.interval_ms));

        let line = batch_for(emitted, &args.label).to_json()?;
        match writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
            Ok(()) => {}
            // the reader went away; nothing left to do
            Err(err) if err.kind() == ErrorKind::BrokenPipe => return Ok(()),
            Err(err) => return Err(err).context("write batch to stdout"),
        }
        emitted += 1;

        if args.diagnostic_every > 0 && emitted % args.diagnostic_every == 0 {
            eprintln!("fake_detector: {} batches emitted", emitted);
        }
    }
    log::debug!("fake_detector: done after {} batches", emitted);
    Ok(())
}

/// One target-label box sliding left to right, plus a static "body" box every other batch.
fn batch_for(seq: u64, label: &str) -> DetectionBatch {
    let x = (seq % 10) as f64 * 0.05;
    let mut detections = vec![Detection::new(
        label,
        BoundingBox {
            x,
            y: 0.2,
            width: x + 0.3,
            height: 0.6,
        },
    )];
    if seq % 2 == 1 {
        detections.push(Detection::new(
            "body",
            BoundingBox {
                x: 0.1,
                y: 0.4,
                width: 0.9,
                height: 1.0,
            },
        ));
    }
    DetectionBatch::new(detections)
}
