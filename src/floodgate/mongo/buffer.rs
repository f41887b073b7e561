/*
 * TCP packet length is limited by the window size field in the TCP packet
 * header, a 16-bit integer, so the largest payload a single segment can
 * carry is 64K. Messages longer than this are not forwarded.
 */
pub const FRAME_BUFFER_SIZE: usize = 64 * 1024;

/// Fixed-capacity accumulation area for the framed direction of a session.
/// Bytes land at the cursor, the forwarder flushes data() as a unit and
/// resets. Deliberately non-growable.
pub struct FrameBuffer {
    data: Box<[u8]>,
    start: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        FrameBuffer {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
        }
    }

    /// The writable region, from the cursor to capacity.
    pub fn cursor(&mut self) -> &mut [u8] {
        &mut self.data[self.start..]
    }

    /// Advances the cursor over n freshly filled bytes. Exceeding capacity
    /// is a programming error in the caller.
    pub fn forward(&mut self, n: usize) {
        assert!(self.start + n <= self.data.len(), "frame buffer overflow");
        self.start += n;
    }

    /// Discards accumulated bytes after they have been flushed.
    pub fn reset(&mut self) {
        self.start = 0;
    }

    /// The accumulated-so-far payload.
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.start]
    }

    pub fn remaining_space(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}
