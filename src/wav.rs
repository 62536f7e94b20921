//! Offline rendering: decode the whole track into a 16-bit PCM WAV file.
//!
//! This drives the same [`PacketPipeline`] the audio callback uses, without an audio device.
//! Useful for verifying a file decodes end to end and for inspecting the output.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::codec::Codec;
use crate::locator::BITS_PER_SAMPLE;
use crate::pipeline::PacketPipeline;

/// The WAV header describing the pipeline's decoded output.
pub fn wav_spec<R, C>(pipeline: &PacketPipeline<R, C>) -> WavSpec {
    let track = pipeline.locator().track();
    WavSpec {
        channels: track.channels as u16,
        sample_rate: track.sample_rate,
        bits_per_sample: BITS_PER_SAMPLE as u16,
        sample_format: SampleFormat::Int,
    }
}

/// Decode every remaining packet into `writer` as WAV.
///
/// Returns the number of sample frames written. The pipeline is closed afterwards, whether or
/// not decoding succeeded.
pub fn render_to_wav<R, C, W>(pipeline: &mut PacketPipeline<R, C>, writer: W) -> Result<u64>
where
    R: Read + Seek,
    C: Codec,
    W: Write + Seek,
{
    let spec = wav_spec(pipeline);
    let channels = u64::from(spec.channels);
    let mut wav = WavWriter::new(writer, spec).context("failed to write WAV header")?;

    let res = write_packets(pipeline, &mut wav);
    pipeline.close();
    let samples = res?;

    wav.finalize().context("failed to finalize WAV data")?;

    let frames = samples / channels;
    info!(frames, "rendered wav");
    Ok(frames)
}

/// Decode every remaining packet into a new WAV file at `path`.
pub fn render_file_to_wav<R, C>(pipeline: &mut PacketPipeline<R, C>, path: impl AsRef<Path>) -> Result<u64>
where
    R: Read + Seek,
    C: Codec,
{
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    render_to_wav(pipeline, BufWriter::new(file))
}

fn write_packets<R, C, W>(pipeline: &mut PacketPipeline<R, C>, wav: &mut WavWriter<W>) -> Result<u64>
where
    R: Read + Seek,
    C: Codec,
    W: Write + Seek,
{
    let mut samples = 0u64;
    while let Some(pcm) = pipeline.next_packet()? {
        for &sample in pcm {
            wav.write_sample(sample).context("failed to write PCM samples")?;
        }
        samples += pcm.len() as u64;
    }
    Ok(samples)
}
