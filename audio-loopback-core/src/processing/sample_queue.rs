use std::collections::VecDeque;

use crate::models::error::AudioError;

/// One device-period sized chunk of pre-rendered audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderBuffer {
    data: Vec<u8>,
    bytes_filled: usize,
}

impl RenderBuffer {
    pub fn new(data: Vec<u8>, bytes_filled: usize) -> Self {
        let bytes_filled = bytes_filled.min(data.len());
        Self { data, bytes_filled }
    }

    /// Valid bytes in this chunk.
    pub fn bytes_filled(&self) -> usize {
        self.bytes_filled
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.bytes_filled]
    }
}

/// A finite source of render-format audio, consumed one chunk at a time.
pub trait SampleSource: Send {
    /// Size in bytes of the next chunk; 0 once exhausted.
    fn buffer_length(&self) -> usize;

    /// Copy the start of the next chunk into `out`, returning the bytes copied.
    ///
    /// The chunk is consumed once all of it has been read; a smaller `out`
    /// leaves the rest at the front. Fails with `InvalidArgument` when `out`
    /// is larger than the chunk.
    fn fill_sample_buffer(&mut self, out: &mut [u8]) -> Result<usize, AudioError>;

    fn is_eof(&self) -> bool;

    /// Drop everything still queued.
    fn flush(&mut self);
}

/// FIFO of [`RenderBuffer`]s shared by the static sample generators.
#[derive(Debug, Default)]
pub struct SampleQueue {
    buffers: VecDeque<RenderBuffer>,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, buffer: RenderBuffer) {
        self.buffers.push_back(buffer);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total valid bytes across all queued chunks.
    pub fn queued_bytes(&self) -> usize {
        self.buffers.iter().map(RenderBuffer::bytes_filled).sum()
    }

    pub fn buffer_length(&self) -> usize {
        self.buffers.front().map_or(0, RenderBuffer::bytes_filled)
    }

    pub fn fill_sample_buffer(&mut self, out: &mut [u8]) -> Result<usize, AudioError> {
        let Some(front) = self.buffers.front_mut() else {
            return Ok(0);
        };
        if out.len() > front.bytes_filled() {
            return Err(AudioError::InvalidArgument(format!(
                "requested {} bytes from a {} byte chunk",
                out.len(),
                front.bytes_filled()
            )));
        }
        let len = out.len();
        out.copy_from_slice(&front.as_bytes()[..len]);
        if len < front.bytes_filled {
            front.data.drain(..len);
            front.bytes_filled -= len;
        } else {
            self.buffers.pop_front();
        }
        Ok(len)
    }

    pub fn flush(&mut self) {
        self.buffers.clear();
    }
}

impl SampleSource for SampleQueue {
    fn buffer_length(&self) -> usize {
        SampleQueue::buffer_length(self)
    }

    fn fill_sample_buffer(&mut self, out: &mut [u8]) -> Result<usize, AudioError> {
        SampleQueue::fill_sample_buffer(self, out)
    }

    fn is_eof(&self) -> bool {
        self.buffers.is_empty()
    }

    fn flush(&mut self) {
        SampleQueue::flush(self)
    }
}
