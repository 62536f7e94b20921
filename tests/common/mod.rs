//! Shared fixtures: an in-memory `.m4a` writer and a codec that needs no real ALAC data.

#![allow(dead_code)]

use std::io::Write;

use alac_play::codec::{AlacConfig, Codec};
use alac_play::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};

/// First byte that makes [`MarkerCodec`] fail to decode a packet.
pub const CORRUPT_PACKET: u8 = 0xEE;

/// ALAC magic cookie (`ALACSpecificConfig`) for 16-bit audio.
pub fn alac_cookie(frame_length: u32, channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut cookie = Vec::with_capacity(24);
    cookie.write_u32::<BigEndian>(frame_length).unwrap();
    cookie.extend_from_slice(&[0, 16, 40, 10, 14, channels]);
    cookie.write_u16::<BigEndian>(255).unwrap();
    cookie.write_u32::<BigEndian>(0).unwrap();
    cookie.write_u32::<BigEndian>(0).unwrap();
    cookie.write_u32::<BigEndian>(sample_rate).unwrap();
    cookie
}

/// Decodes every packet to `frames_per_packet` frames whose samples all equal the packet's
/// first byte. Packets starting with [`CORRUPT_PACKET`] fail.
pub struct MarkerCodec {
    pub config: AlacConfig,
    /// Size of every packet handed to `decode`, in order.
    pub decoded: Vec<usize>,
    pub closed: bool,
}

impl Codec for MarkerCodec {
    fn open(cookie: &[u8]) -> Result<Self> {
        Ok(Self {
            config: AlacConfig::parse(cookie)?,
            decoded: Vec::new(),
            closed: false,
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
        if self.closed {
            return Err(Error::Decode("decoder is closed".into()));
        }
        if packet.first() == Some(&CORRUPT_PACKET) {
            return Err(Error::Decode("corrupt packet".into()));
        }
        self.decoded.push(packet.len());
        let len = (frames_per_packet * channels) as usize;
        out[..len].fill(i16::from(packet.first().copied().unwrap_or(0)));
        Ok(frames_per_packet as usize)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Describes the sound track of a generated `.m4a`.
pub struct TestTrack {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_length: u32,
    /// Packets grouped by chunk.
    pub chunks: Vec<Vec<Vec<u8>>>,
    /// Unrelated bytes written after each chunk.
    pub gap: usize,
    /// Write `co64` instead of `stco`.
    pub co64: bool,
}

impl TestTrack {
    /// Stereo, 44.1 kHz, 4096-frame packets.
    pub fn stereo(chunks: Vec<Vec<Vec<u8>>>) -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            frame_length: 4096,
            chunks,
            gap: 0,
            co64: false,
        }
    }

    pub fn packet_count(&self) -> u32 {
        self.chunks.iter().map(Vec::len).sum::<usize>() as u32
    }
}

/// `count` packets of `size` bytes, each filled with its 1-based index.
pub fn numbered_packets(count: usize, size: usize) -> Vec<Vec<u8>> {
    (1..=count).map(|i| vec![i as u8; size]).collect()
}

/// Serialize `track` as `ftyp`, `mdat`, `moov`.
pub fn build_m4a(track: &TestTrack) -> Vec<u8> {
    build_m4a_after(track, &[])
}

/// Like [`build_m4a`], with `leading` `trak` boxes placed in `moov` ahead of the sound track.
pub fn build_m4a_after(track: &TestTrack, leading: &[Vec<u8>]) -> Vec<u8> {
    let ftyp = make_box(b"ftyp", &[b"M4A ".as_slice(), &[0, 0, 0, 0], b"M4A isom"].concat());

    let mut media = Vec::new();
    let mut offsets = Vec::new();
    let mdat_body_start = (ftyp.len() + 8) as u64;
    for chunk in &track.chunks {
        offsets.push(mdat_body_start + media.len() as u64);
        for packet in chunk {
            media.extend_from_slice(packet);
        }
        media.extend(std::iter::repeat_n(0xA5u8, track.gap));
    }

    let mut out = ftyp;
    out.extend_from_slice(&make_box(b"mdat", &media));
    let mut moov_body = leading.concat();
    moov_body.extend_from_slice(&sound_trak(track, &offsets));
    out.extend_from_slice(&make_box(b"moov", &moov_body));
    out
}

/// A chapter-style `trak` with a `text` handler and a `text` sample entry.
pub fn text_trak() -> Vec<u8> {
    let mut mdhd = Vec::new();
    for value in [0u32, 0, 1000, 5000, 0] {
        mdhd.write_u32::<BigEndian>(value).unwrap();
    }

    let mut hdlr = Vec::new();
    hdlr.write_u32::<BigEndian>(0).unwrap();
    hdlr.extend_from_slice(b"text");
    hdlr.extend_from_slice(&[0u8; 13]);

    let mut stsd_body = Vec::new();
    stsd_body.write_u32::<BigEndian>(1).unwrap();
    stsd_body.extend_from_slice(&make_box(b"text", &[0u8; 16]));

    let mut stts = Vec::new();
    stts.write_u32::<BigEndian>(1).unwrap();
    stts.write_u32::<BigEndian>(1).unwrap();
    stts.write_u32::<BigEndian>(5000).unwrap();

    let stbl = [full_box(b"stsd", &stsd_body), full_box(b"stts", &stts)].concat();
    let minf = make_box(b"minf", &make_box(b"stbl", &stbl));
    let mdia = [full_box(b"mdhd", &mdhd), full_box(b"hdlr", &hdlr), minf].concat();
    make_box(b"trak", &make_box(b"mdia", &mdia))
}

pub fn make_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.write_u32::<BigEndian>((body.len() + 8) as u32).unwrap();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    make_box(kind, &[&[0u8, 0, 0, 0][..], body].concat())
}

fn sound_trak(track: &TestTrack, offsets: &[u64]) -> Vec<u8> {
    let packets = track.packet_count();

    let mut mdhd = Vec::new();
    mdhd.write_u32::<BigEndian>(0).unwrap();
    mdhd.write_u32::<BigEndian>(0).unwrap();
    mdhd.write_u32::<BigEndian>(track.sample_rate).unwrap();
    mdhd.write_u32::<BigEndian>(packets * track.frame_length).unwrap();
    mdhd.write_u32::<BigEndian>(0).unwrap();

    let mut hdlr = Vec::new();
    hdlr.write_u32::<BigEndian>(0).unwrap();
    hdlr.extend_from_slice(b"soun");
    hdlr.extend_from_slice(&[0u8; 13]);

    let stbl = [
        stsd(track),
        stts(track),
        stsc(track),
        stsz(track),
        chunk_offsets(track, offsets),
    ]
    .concat();

    let minf = make_box(b"minf", &make_box(b"stbl", &stbl));
    let mdia = [full_box(b"mdhd", &mdhd), full_box(b"hdlr", &hdlr), minf].concat();
    make_box(b"trak", &make_box(b"mdia", &mdia))
}

fn stsd(track: &TestTrack) -> Vec<u8> {
    let mut entry = Vec::new();
    entry.extend_from_slice(&[0u8; 6]);
    entry.write_u16::<BigEndian>(1).unwrap();
    entry.extend_from_slice(&[0u8; 8]);
    entry.write_u16::<BigEndian>(track.channels).unwrap();
    entry.write_u16::<BigEndian>(16).unwrap();
    entry.write_u32::<BigEndian>(0).unwrap();
    entry.write_u32::<BigEndian>(track.sample_rate << 16).unwrap();
    let cookie = alac_cookie(track.frame_length, track.channels as u8, track.sample_rate);
    entry.extend_from_slice(&full_box(b"alac", &cookie));

    let mut body = Vec::new();
    body.write_u32::<BigEndian>(1).unwrap();
    body.extend_from_slice(&make_box(b"alac", &entry));
    full_box(b"stsd", &body)
}

fn stts(track: &TestTrack) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(1).unwrap();
    body.write_u32::<BigEndian>(track.packet_count()).unwrap();
    body.write_u32::<BigEndian>(track.frame_length).unwrap();
    full_box(b"stts", &body)
}

fn stsc(track: &TestTrack) -> Vec<u8> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for (i, chunk) in track.chunks.iter().enumerate() {
        let count = chunk.len() as u32;
        if runs.last().map(|&(_, n)| n) != Some(count) {
            runs.push((i as u32 + 1, count));
        }
    }

    let mut body = Vec::new();
    body.write_u32::<BigEndian>(runs.len() as u32).unwrap();
    for (first_chunk, samples) in runs {
        body.write_u32::<BigEndian>(first_chunk).unwrap();
        body.write_u32::<BigEndian>(samples).unwrap();
        body.write_u32::<BigEndian>(1).unwrap();
    }
    full_box(b"stsc", &body)
}

fn stsz(track: &TestTrack) -> Vec<u8> {
    let sizes: Vec<u32> = track
        .chunks
        .iter()
        .flatten()
        .map(|p| p.len() as u32)
        .collect();
    let uniform = sizes.windows(2).all(|w| w[0] == w[1]);

    let mut body = Vec::new();
    if uniform {
        body.write_u32::<BigEndian>(sizes.first().copied().unwrap_or(0)).unwrap();
        body.write_u32::<BigEndian>(sizes.len() as u32).unwrap();
    } else {
        body.write_u32::<BigEndian>(0).unwrap();
        body.write_u32::<BigEndian>(sizes.len() as u32).unwrap();
        for size in sizes {
            body.write_u32::<BigEndian>(size).unwrap();
        }
    }
    full_box(b"stsz", &body)
}

fn chunk_offsets(track: &TestTrack, offsets: &[u64]) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(offsets.len() as u32).unwrap();
    for &offset in offsets {
        if track.co64 {
            body.write_u64::<BigEndian>(offset).unwrap();
        } else {
            body.write_u32::<BigEndian>(offset as u32).unwrap();
        }
    }
    let kind = if track.co64 { b"co64" } else { b"stco" };
    full_box(kind, &body)
}

/// Write `data` somewhere the test can open by path.
pub fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".m4a")
        .tempfile()
        .unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}
