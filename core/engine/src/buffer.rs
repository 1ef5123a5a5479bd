//! Output sinks and buffer sizing.
//!
//! Plugins never hand out owned buffers. They push successive segments into
//! a caller-provided [`Sink`], and the caller can ask up front how many bytes
//! an operation may produce for a given input length.

use thiserror::Error;
use tracing::warn;

use kync_common::{KyncError, Result};

/// Failure reported by a sink for a single segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl From<SinkError> for KyncError {
    fn from(error: SinkError) -> Self {
        KyncError::SinkWriteFailed(error.0)
    }
}

/// Push-style output consumer.
///
/// An operation calls `write` zero or more times. The first failure is
/// terminal: the operation stops writing and surfaces the error, and any
/// bytes already accepted must be discarded by the caller.
pub trait Sink {
    /// Accept the next output segment.
    fn write(&mut self, segment: &[u8]) -> std::result::Result<(), SinkError>;
}

impl Sink for Vec<u8> {
    fn write(&mut self, segment: &[u8]) -> std::result::Result<(), SinkError> {
        self.extend_from_slice(segment);
        Ok(())
    }
}

/// Sink that keeps every segment separately.
#[derive(Debug, Default)]
pub struct SegmentSink {
    segments: Vec<Vec<u8>>,
}

impl SegmentSink {
    /// Create an empty segment sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected segments, in write order.
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// Consume the sink and return its segments.
    pub fn into_segments(self) -> Vec<Vec<u8>> {
        self.segments
    }
}

impl Sink for SegmentSink {
    fn write(&mut self, segment: &[u8]) -> std::result::Result<(), SinkError> {
        self.segments.push(segment.to_vec());
        Ok(())
    }
}

/// Sink over a fixed, caller-allocated buffer.
///
/// This is the classic two-phase convention: size the buffer with
/// [`SizeBounds::required_len`], then let the operation fill it.
pub struct BoundedSink<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> BoundedSink<'a> {
    /// Wrap a caller buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// The written prefix of the buffer.
    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.written]
    }
}

impl Sink for BoundedSink<'_> {
    fn write(&mut self, segment: &[u8]) -> std::result::Result<(), SinkError> {
        let end = self
            .written
            .checked_add(segment.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                SinkError(format!(
                    "Buffer too small: capacity {}, need {}",
                    self.buf.len(),
                    self.written + segment.len()
                ))
            })?;
        self.buf[self.written..end].copy_from_slice(segment);
        self.written = end;
        Ok(())
    }
}

/// Push one segment, turning a sink failure into `SinkWriteFailed`.
pub fn emit(sink: &mut dyn Sink, segment: &[u8]) -> Result<()> {
    sink.write(segment).map_err(|e| {
        warn!(len = segment.len(), "Sink rejected segment: {}", e);
        KyncError::from(e)
    })
}

/// Operations that produce sink output and can be sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Id,
    Configs,
    CryptoItemIds,
    Protect,
    Recover,
}

impl Operation {
    /// Look up an operation by its ABI function name.
    ///
    /// # Errors
    /// - `InvalidArgument` if the name is not recognized
    pub fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"id" => Ok(Operation::Id),
            b"configs" => Ok(Operation::Configs),
            b"crypto_item_ids" => Ok(Operation::CryptoItemIds),
            b"protect" => Ok(Operation::Protect),
            b"recover" => Ok(Operation::Recover),
            other => Err(KyncError::InvalidArgument(format!(
                "Unknown function name: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// The ABI function name.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Id => "id",
            Operation::Configs => "configs",
            Operation::CryptoItemIds => "crypto_item_ids",
            Operation::Protect => "protect",
            Operation::Recover => "recover",
        }
    }
}

/// Upper bounds a plugin derives once from its (immutable) item set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    /// Length of the plugin id.
    pub id_len: usize,
    /// Total length of all item ids plus one terminator each.
    pub item_ids_len: usize,
    /// Bytes a capsule adds on top of the protected data, for the longest item id.
    pub capsule_overhead: usize,
}

impl SizeBounds {
    /// Bytes an operation may write for an `input_len`-sized input.
    ///
    /// Independent of config and auth, so it holds for every combination.
    pub fn required_len(&self, op: Operation, input_len: usize) -> usize {
        match op {
            Operation::Id => self.id_len,
            Operation::Configs | Operation::CryptoItemIds => self.item_ids_len,
            Operation::Protect => input_len.saturating_add(self.capsule_overhead),
            Operation::Recover => input_len,
        }
    }
}
