use parking_lot::Mutex;

use crate::models::format::WaveFormat;

/// Default capacity used by the loopback pipeline.
pub const DEFAULT_CAPACITY: usize = 32 * 1024;

/// Only 32-bit samples are moved through the buffer.
const SAMPLE_BYTES: usize = 4;

/// Thread-safe byte ring between a capture producer and a render consumer.
///
/// Frames are written in the source (capture) format and stored in the
/// render format: each source frame contributes its first
/// `min(source, render)` channels and any extra render channels are
/// zero-filled. Both formats must be 32-bit for data to move; otherwise
/// reads and writes are no-ops.
///
/// Overflow behavior: when an incoming write does not fit, all unread data
/// is discarded before the write.
#[derive(Debug)]
pub struct CircularAudioBuffer {
    state: Mutex<RingState>,
}

#[derive(Debug)]
struct RingState {
    data: Vec<u8>,
    front: usize,
    back: usize,
    free: usize,
    source: Option<WaveFormat>,
    render: Option<WaveFormat>,
}

impl CircularAudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                data: vec![0; capacity],
                front: 0,
                back: 0,
                free: capacity,
                source: None,
                render: None,
            }),
        }
    }

    /// Set the format of data handed to [`set_capture_buffer`](Self::set_capture_buffer).
    pub fn set_source_format(&self, format: WaveFormat) {
        let mut state = self.state.lock();
        if !is_supported(&format) {
            log::warn!(
                "loopback source format ({} bit, {} ch) is not supported, buffer disabled",
                format.bits_per_sample,
                format.channels
            );
        }
        state.source = Some(format);
    }

    /// Set the format read back by the renderer. Flushes any buffered data.
    pub fn set_render_format(&self, format: WaveFormat) {
        let mut state = self.state.lock();
        if !is_supported(&format) {
            log::warn!(
                "loopback render format ({} bit, {} ch) is not supported, buffer disabled",
                format.bits_per_sample,
                format.channels
            );
        }
        state.render = Some(format);
        state.clear();
    }

    /// Store captured frames, converting them to the render channel layout.
    ///
    /// Trailing bytes that do not form a whole source frame are ignored.
    /// If the converted data alone exceeds capacity only its newest frames
    /// are kept. Returns the number of bytes stored.
    pub fn set_capture_buffer(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        let Some((source_channels, render_channels)) = state.channels() else {
            return 0;
        };

        let source_frame = source_channels * SAMPLE_BYTES;
        let render_frame = render_channels * SAMPLE_BYTES;
        let max_frames = state.capacity() / render_frame;
        let mut frames = data.len() / source_frame;
        if frames == 0 || max_frames == 0 {
            return 0;
        }

        let mut input = data;
        if frames > max_frames {
            let skipped = frames - max_frames;
            log::debug!("capture block exceeds loopback capacity, keeping newest {} frames", max_frames);
            input = &data[skipped * source_frame..];
            frames = max_frames;
        }

        let needed = frames * render_frame;
        if needed > state.free {
            log::warn!("loopback buffer overrun, discarding {} unread bytes", state.used());
            state.clear();
        }

        let copied = source_channels.min(render_channels) * SAMPLE_BYTES;
        let padding = render_frame - copied;
        for frame in input.chunks_exact(source_frame).take(frames) {
            state.push(&frame[..copied]);
            state.push_zeros(padding);
        }
        needed
    }

    /// Fill `out` with the oldest buffered bytes.
    ///
    /// Writes nothing and returns 0 when `out` is larger than the current
    /// usage or when the formats cannot be serviced.
    pub fn get_capture_buffer(&self, out: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        if out.is_empty() || state.channels().is_none() || out.len() > state.used() {
            return 0;
        }

        let capacity = state.capacity();
        let front = state.front;
        let first = out.len().min(capacity - front);
        let (head, tail) = out.split_at_mut(first);
        head.copy_from_slice(&state.data[front..front + first]);
        tail.copy_from_slice(&state.data[..tail.len()]);

        state.front = (front + out.len()) % capacity;
        state.free += out.len();
        out.len()
    }

    /// Bytes written and not yet read.
    pub fn current_usage(&self) -> usize {
        self.state.lock().used()
    }

    /// Whole render frames available for reading.
    pub fn frames_available(&self) -> usize {
        let state = self.state.lock();
        match state.channels() {
            Some((_, render_channels)) => state.used() / (render_channels * SAMPLE_BYTES),
            None => 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub fn render_format(&self) -> Option<WaveFormat> {
        self.state.lock().render
    }

    pub fn source_format(&self) -> Option<WaveFormat> {
        self.state.lock().source
    }

    /// Discard all buffered data.
    pub fn reset(&self) {
        self.state.lock().clear();
    }
}

impl Default for CircularAudioBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RingState {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn used(&self) -> usize {
        self.capacity() - self.free
    }

    fn clear(&mut self) {
        self.front = 0;
        self.back = 0;
        self.free = self.capacity();
    }

    /// Channel counts of (source, render) when both formats are usable.
    fn channels(&self) -> Option<(usize, usize)> {
        match (self.source, self.render) {
            (Some(source), Some(render)) if is_supported(&source) && is_supported(&render) => {
                Some((source.channels as usize, render.channels as usize))
            }
            _ => None,
        }
    }

    // Callers guarantee `len <= free`.
    fn push(&mut self, bytes: &[u8]) {
        let capacity = self.capacity();
        let first = bytes.len().min(capacity - self.back);
        self.data[self.back..self.back + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        self.data[..rest].copy_from_slice(&bytes[first..]);
        self.back = (self.back + bytes.len()) % capacity;
        self.free -= bytes.len();
    }

    fn push_zeros(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let capacity = self.capacity();
        let first = len.min(capacity - self.back);
        self.data[self.back..self.back + first].fill(0);
        self.data[..len - first].fill(0);
        self.back = (self.back + len) % capacity;
        self.free -= len;
    }
}

fn is_supported(format: &WaveFormat) -> bool {
    format.bits_per_sample as usize == SAMPLE_BYTES * 8 && format.channels > 0
}
