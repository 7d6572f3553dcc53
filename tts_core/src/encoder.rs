//! Per-segment container encoding.

use crate::engine::RawSegment;
use crate::error::{Result, TtsError};
use crate::wav::{AudioFormat, WavHeader, MAX_DATA_LEN};

/// One independently playable WAV buffer: canonical header plus PCM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    header: WavHeader,
    bytes: Vec<u8>,
}

impl Container {
    /// Wrap an existing WAV buffer, checking that its header describes
    /// exactly the payload that follows it.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = WavHeader::parse(&bytes)?;
        let actual = bytes.len() - header.data_offset;
        if actual != header.data_len as usize {
            return Err(TtsError::MalformedContainer(format!(
                "header declares {} payload bytes, buffer holds {actual}",
                header.data_len
            )));
        }
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &WavHeader {
        &self.header
    }

    pub fn format(&self) -> AudioFormat {
        self.header.format
    }

    /// PCM bytes with the header stripped.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header.data_offset..]
    }

    pub fn frame_count(&self) -> u64 {
        self.header.frame_count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Wraps raw engine output into containers, pinning the stream format.
#[derive(Debug, Clone, Default)]
pub struct SegmentEncoder {
    established: Option<AudioFormat>,
}

impl SegmentEncoder {
    /// `target_sample_rate` declares the rate every segment must carry; with
    /// `None` the first segment's rate is adopted.
    pub fn new(target_sample_rate: Option<u32>) -> Self {
        Self {
            established: target_sample_rate.map(AudioFormat::mono16),
        }
    }

    /// Format of the stream so far, if one has been declared or adopted.
    pub fn format(&self) -> Option<AudioFormat> {
        self.established
    }

    pub fn encode(&mut self, segment: RawSegment) -> Result<Container> {
        let actual = AudioFormat::mono16(segment.sample_rate);
        if let Some(expected) = self.established {
            if expected != actual {
                return Err(TtsError::FormatMismatch { expected, actual });
            }
        }
        if let Some(reason) = actual.unsupported_reason() {
            return Err(TtsError::InvalidInput(format!("Engine output: {reason}")));
        }

        let data_len = segment.samples.len() as u64 * actual.block_align() as u64;
        if data_len > MAX_DATA_LEN {
            return Err(TtsError::InvalidInput(format!(
                "Segment of {} samples exceeds the WAV size limit",
                segment.samples.len()
            )));
        }

        let header = WavHeader::new(actual, data_len as u32);
        let mut bytes = Vec::with_capacity(header.data_offset + data_len as usize);
        bytes.extend_from_slice(&header.encode());
        for s in &segment.samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        self.established = Some(actual);
        Ok(Container { header, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_computed_from_samples() {
        let mut enc = SegmentEncoder::new(Some(32000));
        let c = enc.encode(RawSegment::new(32000, vec![100, -100])).unwrap();
        assert_eq!(c.frame_count(), 2);
        assert_eq!(c.header().data_len, 4);
        assert_eq!(c.header().riff_size(), 40);
        assert_eq!(c.payload(), &[100, 0, 0x9c, 0xff]);
        assert_eq!(c.as_bytes().len(), 48);
    }

    #[test]
    fn test_container_is_independently_playable() {
        let mut enc = SegmentEncoder::new(None);
        let c = enc.encode(RawSegment::new(24000, vec![5, 6, 7])).unwrap();
        let reader = hound::WavReader::new(Cursor::new(c.into_bytes())).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 3);
    }

    #[test]
    fn test_empty_segment_is_valid() {
        let mut enc = SegmentEncoder::new(None);
        let c = enc.encode(RawSegment::new(16000, Vec::new())).unwrap();
        assert_eq!(c.frame_count(), 0);
        assert!(c.payload().is_empty());
        assert_eq!(Container::from_bytes(c.as_bytes().to_vec()).unwrap(), c);
    }

    #[test]
    fn test_declared_rate_mismatch() {
        let mut enc = SegmentEncoder::new(Some(44100));
        let err = enc.encode(RawSegment::new(32000, vec![1])).unwrap_err();
        match err {
            TtsError::FormatMismatch { expected, actual } => {
                assert_eq!(expected.sample_rate, 44100);
                assert_eq!(actual.sample_rate, 32000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_adopted_rate_is_enforced() {
        let mut enc = SegmentEncoder::new(None);
        enc.encode(RawSegment::new(32000, vec![1])).unwrap();
        assert_eq!(enc.format(), Some(AudioFormat::mono16(32000)));
        assert!(matches!(
            enc.encode(RawSegment::new(22050, vec![1])),
            Err(TtsError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut enc = SegmentEncoder::new(None);
        assert!(matches!(
            enc.encode(RawSegment::new(0, vec![1])),
            Err(TtsError::InvalidInput(_))
        ));
        assert_eq!(enc.format(), None);
    }

    #[test]
    fn test_overflowing_rate_rejected() {
        let mut enc = SegmentEncoder::new(None);
        assert!(matches!(
            enc.encode(RawSegment::new(3_000_000_000, vec![1])),
            Err(TtsError::InvalidInput(_))
        ));
        assert_eq!(enc.format(), None);
    }

    #[test]
    fn test_from_bytes_rejects_overflowing_rate() {
        let mut enc = SegmentEncoder::new(None);
        let mut bytes = enc.encode(RawSegment::new(8000, vec![1])).unwrap().into_bytes();
        bytes[24..28].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        assert!(matches!(
            Container::from_bytes(bytes),
            Err(TtsError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_from_bytes_rejects_trailing_bytes() {
        let mut enc = SegmentEncoder::new(None);
        let mut bytes = enc.encode(RawSegment::new(8000, vec![1, 2])).unwrap().into_bytes();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            Container::from_bytes(bytes),
            Err(TtsError::MalformedContainer(_))
        ));
    }
}
