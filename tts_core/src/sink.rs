//! Container sinks.
//!
//! Two policies consume an ordered container stream:
//!
//! * [`RawPcmSink`] strips every header and writes bare PCM in arrival order.
//!   The output needs out-of-band format metadata to be played.
//! * [`WavAssembler`] builds one WAV file. The first container is written
//!   verbatim; every later payload is appended to the data region and the
//!   RIFF and `data` length fields are rewritten right after, so the file is
//!   a complete, playable WAV after every append. A failed payload write is
//!   truncated away before the header is touched, which keeps the previously
//!   finalized file intact.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, TryLockError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::encoder::Container;
use crate::error::{Result, TtsError};
use crate::wav::{AudioFormat, WavHeader};

/// Rate used for the header of a stream that ended before any segment.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Seekable output that can also be cut back to a previous length.
pub trait SinkTarget: Read + Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl SinkTarget for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl SinkTarget for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        if self.position() > len {
            self.set_position(len);
        }
        Ok(())
    }
}

impl<T: SinkTarget + ?Sized> SinkTarget for &mut T {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        (**self).truncate(len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub format: Option<AudioFormat>,
    pub frames: u64,
    /// Bytes written to the target, headers included.
    pub bytes: u64,
}

/// Destination of a container stream.
pub trait ContainerSink {
    fn append(&mut self, container: &Container) -> Result<()>;

    /// Append several containers; the resulting payload is byte-identical to
    /// appending them one at a time.
    fn append_all(&mut self, containers: &[Container]) -> Result<()> {
        for c in containers {
            self.append(c)?;
        }
        Ok(())
    }

    fn summary(&self) -> SinkSummary;

    /// Flush and make the output final. Safe to call more than once.
    fn finish(&mut self) -> Result<SinkSummary>;
}

impl<S: ContainerSink + ?Sized> ContainerSink for Box<S> {
    fn append(&mut self, container: &Container) -> Result<()> {
        (**self).append(container)
    }

    fn append_all(&mut self, containers: &[Container]) -> Result<()> {
        (**self).append_all(containers)
    }

    fn summary(&self) -> SinkSummary {
        (**self).summary()
    }

    fn finish(&mut self) -> Result<SinkSummary> {
        (**self).finish()
    }
}

fn check_format(established: Option<AudioFormat>, container: &Container) -> Result<()> {
    match established {
        Some(expected) if expected != container.format() => Err(TtsError::FormatMismatch {
            expected,
            actual: container.format(),
        }),
        _ => Ok(()),
    }
}

/// Check a whole batch before any of it is written.
fn check_batch(established: Option<AudioFormat>, containers: &[Container]) -> Result<()> {
    let expected = established.or_else(|| containers.first().map(Container::format));
    containers.iter().try_for_each(|c| check_format(expected, c))
}

/// Raw policy: concatenated PCM payloads, no header.
#[derive(Debug)]
pub struct RawPcmSink<W: Write> {
    writer: W,
    format: Option<AudioFormat>,
    frames: u64,
    bytes: u64,
}

impl<W: Write> RawPcmSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            format: None,
            frames: 0,
            bytes: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ContainerSink for RawPcmSink<W> {
    fn append(&mut self, container: &Container) -> Result<()> {
        check_format(self.format, container)?;
        self.writer.write_all(container.payload())?;
        self.format = Some(container.format());
        self.frames += container.frame_count();
        self.bytes += container.payload().len() as u64;
        Ok(())
    }

    fn append_all(&mut self, containers: &[Container]) -> Result<()> {
        check_batch(self.format, containers)?;
        containers.iter().try_for_each(|c| self.append(c))
    }

    fn summary(&self) -> SinkSummary {
        SinkSummary {
            format: self.format,
            frames: self.frames,
            bytes: self.bytes,
        }
    }

    fn finish(&mut self) -> Result<SinkSummary> {
        self.writer.flush()?;
        Ok(self.summary())
    }
}

/// Container policy: one WAV file whose header always matches its payload.
#[derive(Debug)]
pub struct WavAssembler<T: SinkTarget> {
    target: T,
    header: Option<WavHeader>,
    empty_format: AudioFormat,
}

impl<T: SinkTarget> WavAssembler<T> {
    /// Start a new file on `target`, discarding anything it held.
    pub fn create(mut target: T) -> Result<Self> {
        target.truncate(0)?;
        target.seek(SeekFrom::Start(0))?;
        Ok(Self {
            target,
            header: None,
            empty_format: AudioFormat::mono16(DEFAULT_SAMPLE_RATE),
        })
    }

    /// Resume assembly of a finalized WAV file. Its `data` chunk must be the
    /// last chunk and hold exactly the declared number of bytes.
    pub fn open_existing(mut target: T) -> Result<Self> {
        target.seek(SeekFrom::Start(0))?;
        let header = WavHeader::read_from(&mut target)?;
        let end = target.seek(SeekFrom::End(0))?;
        let expected = header.data_offset as u64 + header.data_len as u64;
        if end != expected {
            return Err(TtsError::MalformedContainer(format!(
                "file is {end} bytes, header describes {expected}"
            )));
        }
        Ok(Self {
            target,
            empty_format: header.format,
            header: Some(header),
        })
    }

    /// Format written if the stream ends before its first container.
    pub fn with_empty_format(mut self, format: AudioFormat) -> Self {
        self.empty_format = format;
        self
    }

    pub fn header(&self) -> Option<&WavHeader> {
        self.header.as_ref()
    }

    pub fn into_inner(self) -> T {
        self.target
    }

    fn write_first(&mut self, container: &Container) -> Result<()> {
        let written = self
            .target
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.target.write_all(container.as_bytes()))
            .and_then(|_| self.target.flush());
        if let Err(e) = written {
            self.restore(0, None);
            return Err(e.into());
        }
        self.header = Some(*container.header());
        Ok(())
    }

    /// Append `payload` to the data region, then rewrite the length fields.
    fn append_payload(&mut self, header: WavHeader, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        let new_len = header.data_len as u64 + payload.len() as u64;
        if (header.data_offset as u64 - 8) + new_len > u32::MAX as u64 {
            return Err(TtsError::InvalidInput(
                "Assembled audio would exceed the WAV size limit".to_string(),
            ));
        }
        let end = header.data_offset as u64 + header.data_len as u64;

        let written = self
            .target
            .seek(SeekFrom::Start(end))
            .and_then(|_| self.target.write_all(payload))
            .and_then(|_| self.target.flush());
        if let Err(e) = written {
            self.restore(end, None);
            return Err(e.into());
        }

        let updated = header.with_data_len(new_len as u32);
        if let Err(e) = self.write_lengths(&updated) {
            self.restore(end, Some(&header));
            return Err(e.into());
        }
        self.header = Some(updated);
        debug!(frames = updated.frame_count(), "wav header updated");
        Ok(())
    }

    fn write_lengths(&mut self, header: &WavHeader) -> io::Result<()> {
        self.target.seek(SeekFrom::Start(4))?;
        self.target.write_all(&header.riff_size().to_le_bytes())?;
        self.target
            .seek(SeekFrom::Start(header.data_len_offset() as u64))?;
        self.target.write_all(&header.data_len.to_le_bytes())?;
        self.target.flush()
    }

    /// Best effort: drop bytes past `len` and put back the previous lengths.
    fn restore(&mut self, len: u64, previous: Option<&WavHeader>) {
        if let Err(e) = self.target.truncate(len) {
            warn!("could not truncate sink after failed write: {e}");
        }
        if let Some(h) = previous {
            if let Err(e) = self.write_lengths(h) {
                warn!("could not restore wav header: {e}");
            }
        }
    }
}

impl<T: SinkTarget> ContainerSink for WavAssembler<T> {
    fn append(&mut self, container: &Container) -> Result<()> {
        match self.header {
            None => self.write_first(container),
            Some(header) => {
                check_format(Some(header.format), container)?;
                self.append_payload(header, container.payload())
            }
        }
    }

    fn append_all(&mut self, containers: &[Container]) -> Result<()> {
        check_batch(self.header.map(|h| h.format), containers)?;
        let rest = match (self.header, containers.split_first()) {
            (_, None) => return Ok(()),
            (None, Some((first, rest))) => {
                self.write_first(first)?;
                rest
            }
            (Some(_), Some(_)) => containers,
        };
        let payload: Vec<u8> = rest.iter().flat_map(|c| c.payload()).copied().collect();
        match self.header {
            Some(header) => self.append_payload(header, &payload),
            None => Ok(()),
        }
    }

    fn summary(&self) -> SinkSummary {
        match self.header {
            Some(h) => SinkSummary {
                format: Some(h.format),
                frames: h.frame_count(),
                bytes: h.data_offset as u64 + h.data_len as u64,
            },
            None => SinkSummary {
                format: None,
                frames: 0,
                bytes: 0,
            },
        }
    }

    fn finish(&mut self) -> Result<SinkSummary> {
        if self.header.is_none() {
            if let Some(reason) = self.empty_format.unsupported_reason() {
                return Err(TtsError::InvalidInput(format!("Empty stream format: {reason}")));
            }
            let empty = WavHeader::new(self.empty_format, 0);
            let header_bytes = empty.encode();
            self.target.seek(SeekFrom::Start(0))?;
            self.target.write_all(&header_bytes)?;
            self.header = Some(empty);
        }
        self.target.flush()?;
        Ok(self.summary())
    }
}

/// Single-writer guard around a sink.
///
/// Appends never wait: if another writer currently holds the sink the append
/// fails with [`TtsError::SinkBusy`] and may be retried.
#[derive(Debug)]
pub struct SharedSink<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ContainerSink> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    pub fn try_append(&self, container: &Container) -> Result<()> {
        self.acquire()?.append(container)
    }

    pub fn try_finish(&self) -> Result<SinkSummary> {
        self.acquire()?.finish()
    }

    /// Recover the sink once every other handle is gone.
    pub fn into_inner(self) -> Option<S> {
        Arc::try_unwrap(self.inner)
            .ok()
            .and_then(|m| m.into_inner().ok())
    }

    fn acquire(&self) -> Result<std::sync::MutexGuard<'_, S>> {
        self.inner.try_lock().map_err(|e| match e {
            TryLockError::WouldBlock => TtsError::SinkBusy("another writer holds the sink".to_string()),
            TryLockError::Poisoned(_) => {
                TtsError::SinkBusy("sink poisoned by a panicked writer".to_string())
            }
        })
    }
}

/// Feed every container of `stream` into `sink`, then finish it.
///
/// On error the sink keeps everything appended before the failure.
pub fn drain_into<I, S>(stream: I, sink: &mut S) -> Result<SinkSummary>
where
    I: IntoIterator<Item = Result<Container>>,
    S: ContainerSink + ?Sized,
{
    for container in stream {
        sink.append(&container?)?;
    }
    sink.finish()
}

/// Write the stream to `path` as raw PCM.
pub fn save_pcm_stream<I>(stream: I, path: impl AsRef<Path>) -> Result<SinkSummary>
where
    I: IntoIterator<Item = Result<Container>>,
{
    let file = File::create(path.as_ref())?;
    let mut sink = RawPcmSink::new(io::BufWriter::new(file));
    let summary = drain_into(stream, &mut sink)?;
    info!(path = %path.as_ref().display(), frames = summary.frames, "saved pcm stream");
    Ok(summary)
}

/// Assemble the stream into one WAV file at `path`.
pub fn save_wav_stream<I>(stream: I, path: impl AsRef<Path>) -> Result<SinkSummary>
where
    I: IntoIterator<Item = Result<Container>>,
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path.as_ref())?;
    let mut sink = WavAssembler::create(file)?;
    let summary = drain_into(stream, &mut sink)?;
    info!(path = %path.as_ref().display(), frames = summary.frames, "saved wav stream");
    Ok(summary)
}
