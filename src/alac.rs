// src/alac.rs

//! ALAC decoding built on top of Symphonia.
//!
//! Symphonia's ALAC decoder reads its configuration from `CodecParameters::extra_data`, which is
//! exactly the magic cookie from the container. We feed it one packet at a time and copy its
//! output into the caller's interleaved `i16` buffer.

use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_ALAC, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;
use tracing::debug;

use crate::codec::{AlacConfig, Codec};
use crate::{Error, Result};

/// [`Codec`] implementation for Apple Lossless.
pub struct AlacCodec {
    config: AlacConfig,

    // `None` once closed.
    decoder: Option<Box<dyn Decoder>>,

    // Interleaved conversion buffer, sized for one full packet at open time.
    samples: SampleBuffer<i16>,

    // Running timestamp in sample frames, stamped on each packet.
    ts: u64,
}

impl AlacCodec {
    pub fn config(&self) -> &AlacConfig {
        &self.config
    }
}

impl Codec for AlacCodec {
    fn open(cookie: &[u8]) -> Result<Self> {
        let config = AlacConfig::parse(cookie)?;

        let channels = match config.num_channels {
            1 => Channels::FRONT_LEFT,
            2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
            n => {
                return Err(Error::Init(format!(
                    "{n} channels; only mono and stereo are supported"
                )));
            }
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_ALAC)
            .with_sample_rate(config.sample_rate)
            .with_channels(channels)
            .with_max_frames_per_packet(u64::from(config.frame_length))
            .with_extra_data(cookie.to_vec().into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Init(e.to_string()))?;

        let spec = SignalSpec::new(config.sample_rate, channels);
        let samples = SampleBuffer::<i16>::new(u64::from(config.frame_length), spec);

        debug!(
            frame_length = config.frame_length,
            bit_depth = config.bit_depth,
            channels = config.num_channels,
            sample_rate = config.sample_rate,
            "opened alac decoder"
        );

        Ok(Self {
            config,
            decoder: Some(decoder),
            samples,
            ts: 0,
        })
    }

    fn max_output_frame_bytes(&self) -> u32 {
        self.config.max_output_frame_bytes()
    }

    fn decode(
        &mut self,
        packet: &[u8],
        frames_per_packet: u32,
        channels: u32,
        out: &mut [i16],
    ) -> Result<usize> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::Decode("decoder is closed".into()))?;

        let packet = Packet::new_from_slice(0, self.ts, u64::from(frames_per_packet), packet);
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::Decode(e.to_string()))?;

        let decoded_channels = decoded.spec().channels.count();
        if decoded_channels as u32 != channels {
            return Err(Error::Decode(format!(
                "packet has {decoded_channels} channels, track has {channels}"
            )));
        }

        let frames = decoded.frames();
        let len = frames * decoded_channels;
        if len > self.samples.capacity() || len > out.len() {
            return Err(Error::Decode(format!(
                "packet decoded to {frames} frames, more than the configured frame length"
            )));
        }

        self.samples.copy_interleaved_ref(decoded);
        out[..len].copy_from_slice(&self.samples.samples()[..len]);
        self.ts += frames as u64;

        Ok(frames)
    }

    fn close(&mut self) {
        if self.decoder.take().is_some() {
            debug!("closed alac decoder");
        }
    }
}

impl Drop for AlacCodec {
    fn drop(&mut self) {
        self.close();
    }
}
