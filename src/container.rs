// src/container.rs

//! Minimal MP4/M4A box walker that extracts what the sample index needs.
//!
//! We only descend the path that leads to the first sound track's sample tables:
//! `moov → trak → mdia → {mdhd, hdlr, minf → stbl → {stsd, stts, stsc, stsz, stco|co64}}`.
//! Every other box is skipped by seeking past it, so `mdat` is never read here.
//!
//! The result is [`ContainerMetadata`]: plain data with no file handle attached.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use crate::locator::SampleSizes;
use crate::{Error, Result};

/// A four-character box type.
pub type FourCc = [u8; 4];

const MOOV: FourCc = *b"moov";
const TRAK: FourCc = *b"trak";
const MDIA: FourCc = *b"mdia";
const MDHD: FourCc = *b"mdhd";
const HDLR: FourCc = *b"hdlr";
const MINF: FourCc = *b"minf";
const STBL: FourCc = *b"stbl";
const STSD: FourCc = *b"stsd";
const STTS: FourCc = *b"stts";
const STSC: FourCc = *b"stsc";
const STSZ: FourCc = *b"stsz";
const STCO: FourCc = *b"stco";
const CO64: FourCc = *b"co64";
const ALAC: FourCc = *b"alac";
const WAVE: FourCc = *b"wave";
const SOUN: FourCc = *b"soun";

// Audio sample entry body before any child boxes: reserved(6) + data_ref_index(2) +
// version(2) + revision(2) + vendor(4) + channels(2) + sample_size(2) + compression_id(2) +
// packet_size(2) + sample_rate(4, 16.16 fixed point).
const SOUND_ENTRY_V0_LEN: usize = 28;
const SOUND_ENTRY_V1_EXTRA: usize = 16;
const SOUND_ENTRY_V2_EXTRA: usize = 36;

/// Sample-table metadata for one ALAC sound track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMetadata {
    /// Media timescale from `mdhd` (units per second, the sample rate for audio).
    pub timescale: u32,

    /// Media duration from `mdhd`, in timescale units.
    pub duration: u64,

    /// Channel count from the audio sample entry.
    pub channels: u16,

    /// Bits per sample from the audio sample entry.
    pub sample_size_bits: u16,

    /// `(sample_count, sample_delta)` pairs from `stts`.
    pub sample_durations: Vec<(u32, u32)>,

    /// `(first_chunk, samples_per_chunk)` pairs from `stsc`. Chunk numbers are 1-based.
    pub samples_per_chunk: Vec<(u32, u32)>,

    /// Chunk byte offsets from `stco` or `co64`.
    pub chunk_offsets: Vec<u64>,

    /// Sample sizes from `stsz`.
    pub sample_sizes: SampleSizes,

    /// Number of samples declared by `stsz`.
    pub sample_count: u32,

    /// ALAC magic cookie (the `alac` box payload past its version/flags).
    pub magic_cookie: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: FourCc,
    /// Payload length, excluding the header itself.
    body_len: u64,
}

/// Read the sound track's sample-table metadata from an MP4 container.
///
/// Leaves the reader at an unspecified position.
pub fn read_metadata<R>(reader: &mut R) -> Result<ContainerMetadata>
where
    R: Read + Seek,
{
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut pos = 0u64;
    while pos < file_len {
        let header = read_box_header(reader, file_len - pos)?;
        let body_start = reader.stream_position()?;
        let body_end = body_start + header.body_len;

        if header.kind == MOOV {
            if let Some(meta) = read_moov(reader, body_end)? {
                return Ok(meta);
            }
            return Err(Error::Container("no audio track found".into()));
        }

        reader.seek(SeekFrom::Start(body_end))?;
        pos = body_end;
    }

    Err(Error::Container("no moov box found".into()))
}

fn read_moov<R: Read + Seek>(reader: &mut R, end: u64) -> Result<Option<ContainerMetadata>> {
    let mut found = None;
    for_each_child(reader, end, |reader, header, body_end| {
        if header.kind == TRAK && found.is_none() {
            found = read_trak(reader, body_end)?;
        }
        Ok(())
    })?;
    Ok(found)
}

/// Collected while walking one `trak`; turned into [`ContainerMetadata`] if it is a sound track.
#[derive(Default)]
struct TrackBuilder {
    handler: Option<FourCc>,
    timescale: u32,
    duration: u64,
    sample_entry: Option<(FourCc, Vec<u8>)>,
    sample_durations: Vec<(u32, u32)>,
    samples_per_chunk: Vec<(u32, u32)>,
    chunk_offsets: Vec<u64>,
    sample_sizes: Option<SampleSizes>,
    sample_count: u32,
}

fn read_trak<R: Read + Seek>(reader: &mut R, end: u64) -> Result<Option<ContainerMetadata>> {
    let mut track = TrackBuilder::default();
    for_each_child(reader, end, |reader, header, body_end| {
        if header.kind == MDIA {
            read_mdia(reader, body_end, &mut track)?;
        }
        Ok(())
    })?;

    if track.handler != Some(SOUN) {
        return Ok(None);
    }

    let (kind, entry) = track
        .sample_entry
        .ok_or_else(|| Error::Container("sound track has no sample description".into()))?;
    let alac = parse_alac_entry(kind, &entry)?;
    let sample_sizes = track
        .sample_sizes
        .ok_or_else(|| Error::Container("sound track has no stsz box".into()))?;

    debug!(
        timescale = track.timescale,
        duration = track.duration,
        channels = alac.channels,
        samples = track.sample_count,
        chunks = track.chunk_offsets.len(),
        "found alac sound track"
    );

    Ok(Some(ContainerMetadata {
        timescale: track.timescale,
        duration: track.duration,
        channels: alac.channels,
        sample_size_bits: alac.sample_size_bits,
        sample_durations: track.sample_durations,
        samples_per_chunk: track.samples_per_chunk,
        chunk_offsets: track.chunk_offsets,
        sample_sizes,
        sample_count: track.sample_count,
        magic_cookie: alac.magic_cookie,
    }))
}

fn read_mdia<R: Read + Seek>(reader: &mut R, end: u64, track: &mut TrackBuilder) -> Result<()> {
    for_each_child(reader, end, |reader, header, body_end| {
        match header.kind {
            MDHD => read_mdhd(reader, track)?,
            HDLR => {
                // version/flags(4) + pre_defined(4), then the handler type.
                skip(reader, 8)?;
                let mut handler = [0u8; 4];
                reader.read_exact(&mut handler)?;
                track.handler = Some(handler);
            }
            MINF => {
                for_each_child(reader, body_end, |reader, header, body_end| {
                    if header.kind == STBL {
                        read_stbl(reader, body_end, track)?;
                    }
                    Ok(())
                })?;
            }
            _ => {}
        }
        Ok(())
    })
}

fn read_mdhd<R: Read>(reader: &mut R, track: &mut TrackBuilder) -> Result<()> {
    let version = reader.read_u8()?;
    skip(reader, 3)?;
    if version == 1 {
        skip(reader, 16)?;
        track.timescale = reader.read_u32::<BigEndian>()?;
        track.duration = reader.read_u64::<BigEndian>()?;
    } else {
        skip(reader, 8)?;
        track.timescale = reader.read_u32::<BigEndian>()?;
        track.duration = u64::from(reader.read_u32::<BigEndian>()?);
    }
    Ok(())
}

fn read_stbl<R: Read + Seek>(reader: &mut R, end: u64, track: &mut TrackBuilder) -> Result<()> {
    for_each_child(reader, end, |reader, header, _| {
        match header.kind {
            STSD => read_stsd(reader, header, track)?,
            STTS => {
                track.sample_durations = read_pairs(reader, header, "stts")?;
            }
            STSC => {
                skip(reader, 4)?;
                let count = read_entry_count(reader, header, 12, "stsc")?;
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let first_chunk = reader.read_u32::<BigEndian>()?;
                    let samples_per_chunk = reader.read_u32::<BigEndian>()?;
                    let _description_index = reader.read_u32::<BigEndian>()?;
                    pairs.push((first_chunk, samples_per_chunk));
                }
                track.samples_per_chunk = pairs;
            }
            STSZ => {
                skip(reader, 4)?;
                let uniform = reader.read_u32::<BigEndian>()?;
                let count = reader.read_u32::<BigEndian>()?;
                track.sample_count = count;
                track.sample_sizes = Some(if uniform > 0 {
                    SampleSizes::Uniform(uniform)
                } else {
                    ensure_fits(header, 12, count as usize, 4, "stsz")?;
                    let mut sizes = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        sizes.push(reader.read_u32::<BigEndian>()?);
                    }
                    SampleSizes::PerSample(sizes)
                });
            }
            STCO => {
                skip(reader, 4)?;
                let count = read_entry_count(reader, header, 4, "stco")?;
                let mut offsets = Vec::with_capacity(count);
                for _ in 0..count {
                    offsets.push(u64::from(reader.read_u32::<BigEndian>()?));
                }
                track.chunk_offsets = offsets;
            }
            CO64 => {
                skip(reader, 4)?;
                let count = read_entry_count(reader, header, 8, "co64")?;
                let mut offsets = Vec::with_capacity(count);
                for _ in 0..count {
                    offsets.push(reader.read_u64::<BigEndian>()?);
                }
                track.chunk_offsets = offsets;
            }
            _ => {}
        }
        Ok(())
    })
}

fn read_pairs<R: Read>(
    reader: &mut R,
    header: BoxHeader,
    name: &'static str,
) -> Result<Vec<(u32, u32)>> {
    skip(reader, 4)?;
    let count = read_entry_count(reader, header, 8, name)?;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let a = reader.read_u32::<BigEndian>()?;
        let b = reader.read_u32::<BigEndian>()?;
        pairs.push((a, b));
    }
    Ok(pairs)
}

/// Read a table's entry count and check the entries fit inside the box.
///
/// Expects the version/flags word to have been consumed already.
fn read_entry_count<R: Read>(
    reader: &mut R,
    header: BoxHeader,
    entry_len: usize,
    name: &'static str,
) -> Result<usize> {
    let count = reader.read_u32::<BigEndian>()? as usize;
    ensure_fits(header, 8, count, entry_len, name)?;
    Ok(count)
}

fn ensure_fits(
    header: BoxHeader,
    fixed_len: u64,
    count: usize,
    entry_len: usize,
    name: &'static str,
) -> Result<()> {
    let needed = fixed_len + count as u64 * entry_len as u64;
    if needed > header.body_len {
        return Err(Error::Container(format!(
            "{name} declares {count} entries but the box holds {} bytes",
            header.body_len
        )));
    }
    Ok(())
}

/// Keep the first sample entry as-is. It is only interpreted once the track's handler is known,
/// since other tracks (chapters, cover art) carry entries that are not audio.
fn read_stsd<R: Read>(reader: &mut R, header: BoxHeader, track: &mut TrackBuilder) -> Result<()> {
    let mut body = vec![0u8; usize::try_from(header.body_len).map_err(|_| truncated("stsd"))?];
    reader.read_exact(&mut body)?;

    // version/flags(4) + entry_count(4), then the first sample entry as a box.
    let entries = body.get(8..).ok_or_else(|| truncated("stsd"))?;
    let (kind, entry) = split_box(entries).ok_or_else(|| truncated("stsd"))?;
    track.sample_entry = Some((kind, entry.to_vec()));
    Ok(())
}

/// Audio facts read from an `alac` sample entry.
struct AlacEntry {
    channels: u16,
    sample_size_bits: u16,
    magic_cookie: Vec<u8>,
}

fn parse_alac_entry(kind: FourCc, entry: &[u8]) -> Result<AlacEntry> {
    if kind != ALAC {
        return Err(Error::Container(format!(
            "unsupported codec '{}'",
            String::from_utf8_lossy(&kind)
        )));
    }

    if entry.len() < SOUND_ENTRY_V0_LEN {
        return Err(truncated("alac sample entry"));
    }
    let version = u16::from_be_bytes([entry[8], entry[9]]);

    let children_at = match version {
        1 => SOUND_ENTRY_V0_LEN + SOUND_ENTRY_V1_EXTRA,
        2 => SOUND_ENTRY_V0_LEN + SOUND_ENTRY_V2_EXTRA,
        _ => SOUND_ENTRY_V0_LEN,
    };
    let children = entry
        .get(children_at..)
        .ok_or_else(|| truncated("alac sample entry"))?;

    let cookie = find_alac_config(children)
        .ok_or_else(|| Error::Container("alac sample entry has no magic cookie".into()))?;

    Ok(AlacEntry {
        channels: u16::from_be_bytes([entry[16], entry[17]]),
        sample_size_bits: u16::from_be_bytes([entry[18], entry[19]]),
        magic_cookie: cookie.to_vec(),
    })
}

/// Find the `alac` configuration box among `data`'s child boxes, looking inside a QuickTime
/// `wave` box too, and return its payload past the version/flags word.
fn find_alac_config(mut data: &[u8]) -> Option<&[u8]> {
    while let Some((kind, body)) = split_box(data) {
        match kind {
            ALAC => return body.get(4..),
            WAVE => {
                if let Some(cookie) = find_alac_config(body) {
                    return Some(cookie);
                }
            }
            _ => {}
        }
        data = &data[8 + body.len()..];
    }
    None
}

/// Split the first box off an in-memory buffer, returning its type and body.
fn split_box(data: &[u8]) -> Option<(FourCc, &[u8])> {
    let header = data.get(..8)?;
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let kind = [header[4], header[5], header[6], header[7]];
    let body = data.get(8..size.max(8))?;
    Some((kind, body))
}

fn read_box_header<R: Read + Seek>(reader: &mut R, available: u64) -> Result<BoxHeader> {
    let size32 = reader.read_u32::<BigEndian>()?;
    let mut kind = [0u8; 4];
    reader.read_exact(&mut kind)?;

    let (size, header_len) = match size32 {
        // Box extends to the end of its parent.
        0 => (available, 8),
        1 => (reader.read_u64::<BigEndian>()?, 16),
        n => (u64::from(n), 8),
    };

    if size < header_len || size > available {
        return Err(Error::Container(format!(
            "box '{}' has invalid size {size}",
            String::from_utf8_lossy(&kind)
        )));
    }

    Ok(BoxHeader {
        kind,
        body_len: size - header_len,
    })
}

/// Visit each child box between the current position and `end`, seeking past every child's
/// body afterwards no matter how much of it the visitor consumed.
fn for_each_child<R, F>(reader: &mut R, end: u64, mut visit: F) -> Result<()>
where
    R: Read + Seek,
    F: FnMut(&mut R, BoxHeader, u64) -> Result<()>,
{
    let mut pos = reader.stream_position()?;
    while pos + 8 <= end {
        let header = read_box_header(reader, end - pos)?;
        let body_end = reader.stream_position()? + header.body_len;
        visit(reader, header, body_end)?;
        reader.seek(SeekFrom::Start(body_end))?;
        pos = body_end;
    }
    Ok(())
}

fn skip<R: Read>(reader: &mut R, n: u64) -> io::Result<()> {
    let copied = io::copy(&mut reader.by_ref().take(n), &mut io::sink())?;
    if copied < n {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

fn truncated(what: &str) -> Error {
    Error::Container(format!("truncated {what}"))
}
