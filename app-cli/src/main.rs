use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use audio_backend::RenderFn;
use mixer_core::{Mixer, PlayOptions};

#[derive(Parser)]
#[command(name = "audioverse-cli", version, about = "Drive the mixer core from the command line")]
struct Args {
    /// Output sample rate, when a command creates its own mixer.
    #[arg(long, global = true, default_value_t = mixer_core::constants::DEFAULT_OUTPUT_SAMPLE_RATE)]
    sample_rate: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a sound file and play it once through the default output device.
    Play {
        path: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        volume: f32,
        #[arg(long, default_value_t = 0.0)]
        pan: f32,
        #[arg(long)]
        looped: bool,
    },
    /// Play a generated sine tone, useful for smoke-testing a backend.
    Tone {
        #[arg(long, default_value_t = 440.0)]
        freq: f32,
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,
        #[arg(long, default_value_t = 0.2)]
        volume: f32,
    },
    /// Decode a file and print its format info without playing it.
    Probe { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Play { path, volume, pan, looped } => play(&path, args.sample_rate, volume, pan, looped),
        Command::Tone { freq, seconds, volume } => tone(args.sample_rate, freq, seconds, volume),
        Command::Probe { path } => probe(&path),
    }
}

fn run_with_backend(mixer: Mixer) -> Result<Box<dyn audio_backend::AudioBackend>> {
    let mut backend = audio_backend::create_audio_backend().map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let render: RenderFn = Arc::new(move |data: &mut [f32], _sample_rate: u32, frames: usize| {
        mixer.mix(data, frames);
    });
    backend.start(render).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    Ok(backend)
}

fn play(path: &std::path::Path, sample_rate: u32, volume: f32, pan: f32, looped: bool) -> Result<()> {
    asset_io::validate_path(path).context("validating asset path")?;
    let decoded = asset_io::decode_file(path).with_context(|| format!("decoding {}", path.display()))?;

    let mixer = Mixer::new(sample_rate);
    let asset = mixer.create_from_decoded(decoded.frequency, decoded.channels, &decoded.interleaved);
    if !asset.is_valid() {
        bail!("could not create an asset from {}", path.display());
    }

    let frames = decoded.interleaved.len() as f64 / decoded.channels as f64;
    let duration_secs = frames / decoded.frequency as f64;

    let mut opts = PlayOptions::default().volume(volume).pan(pan);
    if looped {
        opts = opts.looped();
    }

    let backend = run_with_backend(mixer.clone())?;
    let handle = mixer.play(asset, opts);
    if !handle.is_valid() {
        bail!("play() returned an invalid handle");
    }

    if looped {
        tracing::info!("looping playback; press Ctrl+C to stop");
        loop {
            std::thread::sleep(Duration::from_secs(1));
        }
    } else {
        std::thread::sleep(Duration::from_secs_f64(duration_secs + 0.25));
    }

    drop(backend);
    Ok(())
}

fn tone(sample_rate: u32, freq: f32, seconds: f32, volume: f32) -> Result<()> {
    let frame_count = (sample_rate as f32 * seconds) as usize;
    let samples: Vec<f32> = (0..frame_count)
        .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect();

    let mixer = Mixer::new(sample_rate);
    let asset = mixer.create_from_mono(sample_rate, &samples);
    let backend = run_with_backend(mixer.clone())?;
    mixer.play(asset, PlayOptions::default().volume(volume));

    std::thread::sleep(Duration::from_secs_f32(seconds + 0.25));
    drop(backend);
    Ok(())
}

fn probe(path: &std::path::Path) -> Result<()> {
    asset_io::validate_path(path).context("validating asset path")?;
    let decoded = asset_io::decode_file(path).with_context(|| format!("decoding {}", path.display()))?;
    let frames = decoded.interleaved.len() as f64 / decoded.channels as f64;
    println!(
        "{}: {} Hz, {} channel(s), {} frames ({:.2}s)",
        path.display(),
        decoded.frequency,
        decoded.channels,
        frames,
        frames / decoded.frequency as f64
    );
    Ok(())
}
