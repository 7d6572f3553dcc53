//! RIFF/WAVE header codec for 16-bit PCM mono audio.
//!
//! Headers are always *computed* from the payload they describe. The writer
//! side only ever produces the canonical 44-byte layout; the reader side walks
//! RIFF chunks so that files carrying extra chunks ahead of `data` (e.g. a
//! `LIST` chunk written by another tool) can still be resumed.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TtsError};

/// Size of the canonical header written in front of every payload.
pub const HEADER_LEN: usize = 44;

/// Largest payload that still fits the 32-bit RIFF size field.
pub const MAX_DATA_LEN: u64 = u32::MAX as u64 - (HEADER_LEN as u64 - 8);

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;
// Upper bound for a non-data chunk we are willing to buffer while scanning.
const MAX_SKIPPED_CHUNK: u32 = 1 << 20;

/// Sample layout shared by every container of one synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 16-bit little-endian mono, the only layout this crate produces.
    pub const fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.bits_per_sample / 8)
    }

    /// Bytes per second, or `None` when it does not fit the 32-bit field.
    pub fn byte_rate(&self) -> Option<u32> {
        self.sample_rate.checked_mul(self.block_align() as u32)
    }

    /// Returns the reason this format cannot be written, if any.
    pub fn unsupported_reason(&self) -> Option<String> {
        if self.sample_rate == 0 {
            Some("sample rate must be positive".to_string())
        } else if self.channels != 1 {
            Some(format!("{} channels (only mono is supported)", self.channels))
        } else if self.bits_per_sample != 16 {
            Some(format!(
                "{}-bit samples (only 16-bit PCM is supported)",
                self.bits_per_sample
            ))
        } else if self.byte_rate().is_none() {
            Some(format!("sample rate {} Hz is too high", self.sample_rate))
        } else {
            None
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz/{} ch/{}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Parsed view of a RIFF/WAVE header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: AudioFormat,
    /// Declared length of the `data` chunk in bytes.
    pub data_len: u32,
    /// Offset of the first payload byte from the start of the file.
    pub data_offset: usize,
}

impl WavHeader {
    /// Canonical header describing `data_len` payload bytes.
    pub fn new(format: AudioFormat, data_len: u32) -> Self {
        Self {
            format,
            data_len,
            data_offset: HEADER_LEN,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.data_len as u64 / self.format.block_align() as u64
    }

    /// Value of the RIFF size field: everything after the first 8 bytes.
    pub fn riff_size(&self) -> u32 {
        (self.data_offset - 8) as u32 + self.data_len
    }

    /// Byte offset of the `data` chunk size field.
    pub fn data_len_offset(&self) -> usize {
        self.data_offset - 4
    }

    /// Header with its length fields recomputed for a new payload length.
    pub fn with_data_len(&self, data_len: u32) -> Self {
        Self { data_len, ..*self }
    }

    /// Serialize as the canonical 44-byte header.
    ///
    /// The format is assumed to have passed
    /// [`AudioFormat::unsupported_reason`]; an overflowing byte rate is
    /// written as zero.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let canonical = Self::new(self.format, self.data_len);
        let mut out = [0u8; HEADER_LEN];

        // RIFF header
        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&canonical.riff_size().to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");

        // fmt chunk
        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
        out[20..22].copy_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
        out[22..24].copy_from_slice(&self.format.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.format.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.format.byte_rate().unwrap_or(0).to_le_bytes());
        out[32..34].copy_from_slice(&self.format.block_align().to_le_bytes());
        out[34..36].copy_from_slice(&self.format.bits_per_sample.to_le_bytes());

        // data chunk
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// `bytes` must reach at least the `data` chunk header; the payload itself
    /// is not required.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(malformed("too short for a RIFF header"));
        }
        if &bytes[0..4] != b"RIFF" {
            return Err(malformed("missing RIFF tag"));
        }
        if &bytes[8..12] != b"WAVE" {
            return Err(malformed("missing WAVE tag"));
        }

        let mut pos = 12usize;
        let mut format: Option<AudioFormat> = None;
        loop {
            if pos + 8 > bytes.len() {
                return Err(malformed("missing data chunk"));
            }
            let id = &bytes[pos..pos + 4];
            let size = read_u32(bytes, pos + 4);
            let body = pos + 8;

            match id {
                b"fmt " => {
                    if size < FMT_CHUNK_LEN || body + FMT_CHUNK_LEN as usize > bytes.len() {
                        return Err(malformed("truncated fmt chunk"));
                    }
                    format = Some(parse_fmt(&bytes[body..body + FMT_CHUNK_LEN as usize])?);
                }
                b"data" => {
                    let format = format.ok_or_else(|| malformed("data chunk before fmt chunk"))?;
                    if size % format.block_align() as u32 != 0 {
                        return Err(malformed(format!(
                            "data length {size} is not a whole number of frames"
                        )));
                    }
                    return Ok(Self {
                        format,
                        data_len: size,
                        data_offset: body,
                    });
                }
                _ => {}
            }
            // Chunks are word aligned
            pos = body + size as usize + (size as usize & 1);
        }
    }

    /// Read and parse a header from the current position of `reader`,
    /// leaving the reader at the first payload byte.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = vec![0u8; 12];
        reader.read_exact(&mut buf).map_err(truncated)?;
        loop {
            let start = buf.len();
            buf.resize(start + 8, 0);
            reader.read_exact(&mut buf[start..]).map_err(truncated)?;
            if &buf[start..start + 4] == b"data" {
                return Self::parse(&buf);
            }
            let size = read_u32(&buf, start + 4);
            if size > MAX_SKIPPED_CHUNK {
                return Err(malformed(format!("chunk of {size} bytes before data")));
            }
            let padded = size as usize + (size as usize & 1);
            let body = buf.len();
            buf.resize(body + padded, 0);
            reader.read_exact(&mut buf[body..]).map_err(truncated)?;
        }
    }
}

fn parse_fmt(chunk: &[u8]) -> Result<AudioFormat> {
    let tag = read_u16(chunk, 0);
    if tag != PCM_FORMAT_TAG {
        return Err(malformed(format!("format tag {tag} is not integer PCM")));
    }
    let format = AudioFormat {
        channels: read_u16(chunk, 2),
        sample_rate: read_u32(chunk, 4),
        bits_per_sample: read_u16(chunk, 14),
    };
    if let Some(reason) = format.unsupported_reason() {
        return Err(malformed(format!("unsupported layout: {reason}")));
    }
    if Some(read_u32(chunk, 8)) != format.byte_rate() || read_u16(chunk, 12) != format.block_align() {
        return Err(malformed("byte rate or block align disagrees with format"));
    }
    Ok(format)
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn malformed(msg: impl Into<String>) -> TtsError {
    TtsError::MalformedContainer(msg.into())
}

fn truncated(e: std::io::Error) -> TtsError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        malformed("header truncated")
    } else {
        TtsError::SinkIo(e)
    }
}

/// Little-endian PCM bytes for a buffer of samples.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Base64 of a finished container, for JSON transports.
pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Re-read a finalized file and check its header against its payload.
///
/// The header fields are re-derived from the number of payload bytes actually
/// present and compared with the stored ones; the file is then decoded by
/// `hound` as an independent reader. Returns the stored header.
pub fn inspect_wav<R: Read + Seek>(reader: &mut R) -> Result<WavHeader> {
    reader.seek(SeekFrom::Start(0))?;
    let header = WavHeader::read_from(reader)?;
    let end = reader.seek(SeekFrom::End(0))?;
    let actual = end - header.data_offset as u64;
    if actual != header.data_len as u64 {
        return Err(malformed(format!(
            "header declares {} payload bytes, file holds {actual}",
            header.data_len
        )));
    }

    let mut head = vec![0u8; header.data_offset];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut head)?;
    let rederived = header.with_data_len(actual as u32);
    if read_u32(&head, 4) != rederived.riff_size() {
        return Err(malformed("RIFF size disagrees with payload length"));
    }

    reader.seek(SeekFrom::Start(0))?;
    let decoded = hound::WavReader::new(&mut *reader)
        .map_err(|e| malformed(format!("wav decode error: {e}")))?;
    let spec = decoded.spec();
    if spec.sample_rate != header.format.sample_rate
        || spec.channels != header.format.channels
        || spec.bits_per_sample != header.format.bits_per_sample
        || decoded.duration() as u64 != header.frame_count()
    {
        return Err(malformed("decoded stream disagrees with header"));
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn container(format: AudioFormat, samples: &[i16]) -> Vec<u8> {
        let payload = samples_to_le_bytes(samples);
        let mut out = WavHeader::new(format, payload.len() as u32).encode().to_vec();
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn test_encode_canonical_layout() {
        let header = WavHeader::new(AudioFormat::mono16(32000), 10);
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_u32(&bytes, 4), 46);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(read_u16(&bytes, 22), 1);
        assert_eq!(read_u32(&bytes, 24), 32000);
        assert_eq!(read_u32(&bytes, 28), 64000);
        assert_eq!(read_u16(&bytes, 32), 2);
        assert_eq!(read_u16(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(read_u32(&bytes, 40), 10);
        assert_eq!(header.frame_count(), 5);
    }

    #[test]
    fn test_hound_reads_encoded_container() {
        let bytes = container(AudioFormat::mono16(22050), &[1, -2, 3]);
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 3]);
    }

    #[test]
    fn test_parse_skips_unknown_chunks() {
        let canonical = container(AudioFormat::mono16(16000), &[7, 8]);
        // Splice a LIST chunk with an odd body between fmt and data
        let mut bytes = canonical[..36].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        bytes.extend_from_slice(&canonical[36..]);
        let riff = (bytes.len() - 8) as u32;
        bytes[4..8].copy_from_slice(&riff.to_le_bytes());

        let header = WavHeader::parse(&bytes).unwrap();
        assert_eq!(header.data_offset, 56);
        assert_eq!(header.data_len, 4);
        assert_eq!(header.riff_size(), riff);

        let read = WavHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(read, header);
    }

    #[test]
    fn test_parse_rejects_foreign_layouts() {
        let mut stereo = container(AudioFormat::mono16(16000), &[0, 0]);
        stereo[22..24].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            WavHeader::parse(&stereo),
            Err(TtsError::MalformedContainer(_))
        ));

        let mut float = container(AudioFormat::mono16(16000), &[0]);
        float[20..22].copy_from_slice(&3u16.to_le_bytes());
        assert!(WavHeader::parse(&float).is_err());

        assert!(WavHeader::parse(b"RIFF\0\0\0\0WAVE").is_err());
        assert!(WavHeader::parse(b"nope").is_err());
    }

    #[test]
    fn test_byte_rate_overflow_is_unsupported() {
        let highest = AudioFormat::mono16(u32::MAX / 2);
        assert_eq!(highest.byte_rate(), Some(u32::MAX - 1));
        assert!(highest.unsupported_reason().is_none());

        let too_fast = AudioFormat::mono16(u32::MAX / 2 + 1);
        assert_eq!(too_fast.byte_rate(), None);
        assert!(too_fast.unsupported_reason().unwrap().contains("too high"));
    }

    #[test]
    fn test_parse_rejects_overflowing_sample_rate() {
        let mut bytes = container(AudioFormat::mono16(16000), &[1]);
        bytes[24..28].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        assert!(matches!(
            WavHeader::parse(&bytes),
            Err(TtsError::MalformedContainer(_))
        ));
        assert!(matches!(
            inspect_wav(&mut Cursor::new(&bytes)),
            Err(TtsError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_parse_rejects_partial_frame() {
        let mut bytes = container(AudioFormat::mono16(16000), &[1, 2]);
        bytes[40..44].copy_from_slice(&3u32.to_le_bytes());
        assert!(WavHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_inspect_detects_stale_header() {
        let mut bytes = container(AudioFormat::mono16(32000), &[1, 2, 3]);
        let header = inspect_wav(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.frame_count(), 3);

        // Naive concatenation: extra samples beyond the declared length
        bytes.extend_from_slice(&samples_to_le_bytes(&[4, 5]));
        assert!(matches!(
            inspect_wav(&mut Cursor::new(&bytes)),
            Err(TtsError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_samples_are_little_endian() {
        assert_eq!(samples_to_le_bytes(&[1, -1, 256]), vec![1, 0, 0xff, 0xff, 0, 1]);
    }
}
