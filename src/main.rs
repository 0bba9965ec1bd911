use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use synthroute::{
    audio::driver::create_driver,
    midi::MidiInputs,
    route::{RouteEvent, SynthRoute, SynthRouteState},
    synth::RustySynth,
    Settings,
};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(about = "Routes MIDI inputs into a SoundFont synthesizer with low-latency audio output.")]
pub struct Args {
    #[arg(short, long, help = "Path to a JSON settings file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Path to the SoundFont (.sf2)")]
    soundfont: PathBuf,

    #[arg(short, long, help = "Audio output device name")]
    device: Option<String>,

    #[arg(long, help = "Sample rate in Hz")]
    sample_rate: Option<u32>,

    #[arg(short, long, help = "Prerendering latency in frames")]
    latency: Option<u32>,

    #[arg(short, long = "midi-port", help = "MIDI input port to connect (repeatable)")]
    midi_ports: Vec<String>,

    #[arg(long, default_value_t = Level::INFO, help = "Maximum log level")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting synthroute > version: {}", VERSION.unwrap_or("?"));

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(device) = args.device {
        settings.audio.device = Some(device);
    }
    if let Some(sample_rate) = args.sample_rate {
        settings.audio.sample_rate = sample_rate;
    }
    if let Some(latency) = args.latency {
        settings.audio.latency.audio_latency_frames = latency;
    }
    settings.midi.input_ports.extend(args.midi_ports);

    info!("| SoundFont: {:?}", args.soundfont);
    info!("| Available MIDI ports:");
    for port in MidiInputs::get_available_ports() {
        info!("| - {port}");
    }

    let synth = RustySynth::from_file(&args.soundfont)?;
    let driver = create_driver(settings.audio.driver);
    let route = SynthRoute::new(Box::new(synth), driver, settings.audio.clone());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    route.add_observer(Arc::new(event_tx))?;

    let mut inputs = MidiInputs::new(route.clone());
    for port in &settings.midi.input_ports {
        match inputs.connect_input(port) {
            Ok(session) => {
                if settings.midi.exclusive_port.as_deref() == Some(port.as_str()) {
                    route.enable_exclusive_midi_mode(session)?;
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    info!("| Connected MIDI inputs: {:?}", inputs.connected_input_names());

    route.open(None)?;
    if let Some(latency) = route.stream_latency() {
        info!(
            "| Audio latency: {} frames, MIDI latency: {} frames",
            latency.audio_latency_frames, latency.midi_latency_frames
        );
    }

    let closed = async {
        while let Some(event) = event_rx.recv().await {
            match event {
                RouteEvent::AudioStreamFailed => warn!("Audio stream failed"),
                RouteEvent::StateChanged(SynthRouteState::Closed) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            inputs.disconnect_all();
            route.close()?;
        }
        _ = closed => {
            info!("Synth route closed, exiting");
        }
    }

    Ok(())
}
