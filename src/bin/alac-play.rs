use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, SyncSender};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tracing::{error, info, warn};

use alac_play::alac::AlacCodec;
use alac_play::decode_ahead::{PlayoutConsumer, ProducerHandle};
use alac_play::logging;
use alac_play::scheduler::PlaybackScheduler;
use alac_play::{OutputSample, PlaybackMode, PlaybackOpts, Player, StreamStatus};

#[derive(Parser, Debug)]
#[command(name = "alac-play")]
#[command(about = "Play an Apple Lossless (ALAC) .m4a file")]
struct Params {
    /// Path to the `.m4a`/`.mp4` file.
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Decode inside the audio callback (`direct`) or ahead of it (`buffered`).
    #[arg(long = "mode", value_enum, default_value_t = PlaybackMode::Buffered)]
    mode: PlaybackMode,

    /// Sample frames requested per audio callback.
    #[arg(long = "buffer-frames", default_value_t = 4096)]
    buffer_frames: u32,

    /// Decode-ahead capacity in seconds (buffered mode).
    #[arg(long = "ring-seconds", default_value_t = 2.0)]
    ring_seconds: f32,

    /// Render to a WAV file instead of the audio device.
    #[arg(long = "wav-out")]
    wav_out: Option<PathBuf>,

    /// Print track information as JSON and exit.
    #[arg(long = "probe", default_value_t = false)]
    probe: bool,
}

impl Params {
    fn opts(&self) -> PlaybackOpts {
        PlaybackOpts {
            mode: self.mode,
            buffer_frames: self.buffer_frames,
            ring_seconds: self.ring_seconds,
            frames_per_packet_hint: None,
        }
    }
}

/// How the stream ended, as reported from the audio callback.
enum Finished {
    Complete,
    Aborted(Option<alac_play::Error>),
}

/// Whatever produces audio inside the callback.
enum Renderer {
    Direct(PlaybackScheduler<BufReader<File>, AlacCodec>),
    Buffered(PlayoutConsumer),
}

impl Renderer {
    fn render<S: OutputSample>(&mut self, out: &mut [S]) -> StreamStatus {
        match self {
            Self::Direct(scheduler) => scheduler.render(out),
            Self::Buffered(consumer) => consumer.render(out),
        }
    }

    fn take_error(&mut self) -> Option<alac_play::Error> {
        match self {
            Self::Direct(scheduler) => scheduler.take_error(),
            Self::Buffered(_) => None,
        }
    }
}

fn main() -> Result<()> {
    logging::init();
    let params = Params::parse();
    let player = Player::open(&params.file, params.opts())?;

    if params.probe {
        let stdout = io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        serde_json::to_writer_pretty(&mut writer, &player.track_info())?;
        writeln!(writer)?;
        return Ok(());
    }

    if let Some(path) = &params.wav_out {
        let frames = player.render_file_to_wav(path)?;
        info!(frames, path = %path.display(), "wrote wav");
        return Ok(());
    }

    play(player)
}

fn play(player: Player) -> Result<()> {
    let track = *player.track();
    let opts = player.opts().clone();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no default output device found"))?;
    let sample_format = device
        .default_output_config()
        .context("failed to query default output config")?
        .sample_format();

    let config = StreamConfig {
        channels: track.channels as u16,
        sample_rate: SampleRate(track.sample_rate),
        buffer_size: BufferSize::Fixed(opts.buffer_frames),
    };

    let (renderer, mut producer) = match opts.mode {
        PlaybackMode::Direct => (Renderer::Direct(player.into_scheduler()?), None),
        PlaybackMode::Buffered => {
            let (consumer, handle) = player.spawn_decode_ahead()?;
            (Renderer::Buffered(consumer), Some(handle))
        }
    };

    let (done_tx, done_rx) = mpsc::sync_channel(1);
    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer, done_tx)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer, done_tx)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer, done_tx)?,
        other => return Err(anyhow!("unsupported output sample format {other:?}")),
    };

    stream.play().context("failed to start audio stream")?;
    info!(
        sample_rate = track.sample_rate,
        channels = track.channels,
        duration_secs = track.duration_secs(),
        "playing"
    );

    let finished = done_rx
        .recv()
        .context("audio stream stopped without reporting completion")?;
    drop(stream);

    let producer_result = match producer.as_mut() {
        Some(handle) => stop_producer(handle),
        None => Ok(()),
    };

    match finished {
        Finished::Complete => producer_result,
        Finished::Aborted(Some(err)) => Err(anyhow!(err).context("playback aborted")),
        Finished::Aborted(None) => match producer_result {
            Err(err) => Err(err.context("playback aborted")),
            Ok(()) => Err(anyhow!("playback aborted")),
        },
    }
}

fn stop_producer(handle: &mut ProducerHandle) -> Result<()> {
    let underruns = handle.underruns();
    if underruns > 0 {
        warn!(underruns, "decode-ahead could not keep up");
    }
    handle.stop()?;
    Ok(())
}

fn build_stream<S>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut renderer: Renderer,
    done: SyncSender<Finished>,
) -> Result<Stream>
where
    S: OutputSample + SizedSample,
{
    let mut reported = false;
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [S], _: &cpal::OutputCallbackInfo| {
                let status = renderer.render(data);
                if reported {
                    return;
                }
                let finished = match status {
                    StreamStatus::Continue => return,
                    StreamStatus::Complete => Finished::Complete,
                    StreamStatus::Abort => Finished::Aborted(renderer.take_error()),
                };
                reported = true;
                let _ = done.try_send(finished);
            },
            |err| error!(error = %err, "audio stream error"),
            None,
        )
        .context("failed to build audio stream")?;

    Ok(stream)
}
