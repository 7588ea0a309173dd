//! # Frame Buffer
//!
//! Fixed-size circular buffer holding the most recent samples of the live
//! signal. Audio blocks are pushed in as they arrive and the pitch estimator
//! reads a chronological snapshot of the whole buffer (the analysis window),
//! which is usually larger than one processing block.

/// Circular buffer storing the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    data: Vec<f32>,
    write_pos: usize,
    filled: bool,
}

impl FrameBuffer {
    /// Creates a zero-filled buffer of `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            write_pos: 0,
            filled: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid samples written so far (saturates at capacity).
    pub fn len(&self) -> usize {
        if self.filled { self.data.len() } else { self.write_pos }
    }

    pub fn is_empty(&self) -> bool {
        !self.filled && self.write_pos == 0
    }

    /// Whether a full analysis window of real samples is available.
    pub fn is_full(&self) -> bool {
        self.filled
    }

    /// Appends a block of samples, overwriting the oldest ones.
    pub fn push_slice(&mut self, samples: &[f32]) {
        let capacity = self.data.len();

        // Only the newest `capacity` samples can survive anyway.
        if samples.len() >= capacity {
            let tail = &samples[samples.len() - capacity..];
            self.data.copy_from_slice(tail);
            self.write_pos = 0;
            self.filled = true;
            return;
        }

        let first = (capacity - self.write_pos).min(samples.len());
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&samples[first..]);
        }

        let next = self.write_pos + samples.len();
        if next >= capacity {
            self.filled = true;
        }
        self.write_pos = next % capacity;
    }

    /// Copies the buffer into `dest` in chronological order (oldest first).
    ///
    /// `dest` must be exactly `capacity()` samples long. Slots that have not
    /// been written yet read as zero.
    pub fn copy_window(&self, dest: &mut [f32]) {
        debug_assert_eq!(dest.len(), self.data.len());
        let split = self.data.len() - self.write_pos;
        dest[..split].copy_from_slice(&self.data[self.write_pos..]);
        dest[split..].copy_from_slice(&self.data[..self.write_pos]);
    }

    /// Clears all samples.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.write_pos = 0;
        self.filled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_chronological_after_wrap() {
        let mut frame = FrameBuffer::new(4);
        frame.push_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_full());

        frame.push_slice(&[4.0, 5.0]);
        assert!(frame.is_full());

        let mut window = [0.0; 4];
        frame.copy_window(&mut window);
        assert_eq!(window, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn unwritten_slots_read_as_zero() {
        let mut frame = FrameBuffer::new(4);
        frame.push_slice(&[7.0]);
        let mut window = [1.0; 4];
        frame.copy_window(&mut window);
        assert_eq!(window, [0.0, 0.0, 0.0, 7.0]);
    }

    #[test]
    fn oversized_block_keeps_newest_samples() {
        let mut frame = FrameBuffer::new(3);
        frame.push_slice(&[1.0]);
        frame.push_slice(&[2.0, 3.0, 4.0, 5.0, 6.0]);

        let mut window = [0.0; 3];
        frame.copy_window(&mut window);
        assert_eq!(window, [4.0, 5.0, 6.0]);

        frame.push_slice(&[7.0]);
        frame.copy_window(&mut window);
        assert_eq!(window, [5.0, 6.0, 7.0]);
    }

    #[test]
    fn reset_clears_history() {
        let mut frame = FrameBuffer::new(2);
        frame.push_slice(&[1.0, 2.0]);
        frame.reset();
        assert!(frame.is_empty());
        let mut window = [9.0; 2];
        frame.copy_window(&mut window);
        assert_eq!(window, [0.0, 0.0]);
    }
}
