use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{info, warn};

use ads1298::{Ads1298DriverBuilder, DriverSettings, FrameEvent, TransportKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream samples from an ADS1298", long_about = None)]
struct Args {
    /// Driver settings file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run with synthetic data instead of the SPI/GPIO hardware
    #[arg(long)]
    simulate: bool,

    /// Route the internal test signal to every channel
    #[arg(long)]
    test_signal: bool,

    /// Sample rate in Hz (500, 1000, 2000 or 4000)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Enable the bias drive
    #[arg(long)]
    bias: bool,

    /// How long to stream, in seconds
    #[arg(long, default_value_t = 10)]
    seconds: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => DriverSettings::from_json_file(path)?,
        None => DriverSettings::default(),
    };
    if args.simulate {
        settings.transport = TransportKind::Simulated;
    }

    let mut driver = Ads1298DriverBuilder::new().settings(settings).build()?;
    driver.configure(args.sample_rate, args.bias.then_some(true))?;
    let rx = driver.subscribe(1024);

    driver.open()?;
    if args.test_signal {
        driver.start_test_stream()?;
    } else {
        driver.start_exg_stream()?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining.min(Duration::from_millis(500))) {
            Ok(FrameEvent::Sample(sample)) => {
                let values: Vec<String> = sample
                    .channel_values
                    .iter()
                    .map(|v| format!("{:+.6e}", v))
                    .collect();
                println!(
                    "LOFF_P {:08b} LOFF_N {:08b} | {}",
                    sample.lead_off_positive,
                    sample.lead_off_negative,
                    values.join(" ")
                );
            }
            Ok(FrameEvent::Error(e)) => warn!("Frame error: {}", e),
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    driver.stop_stream()?;
    let stats = driver.stats();
    info!(
        "Decoded {} frames, rejected {}, {} read failures",
        stats.frames_decoded, stats.frames_rejected, stats.read_failures
    );
    driver.close()?;

    Ok(())
}
