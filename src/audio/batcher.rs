//! # Frame Batching
//!
//! Generators produce audio one frame at a time, but sending every frame as its own
//! message would flood the connection with tiny payloads. The batcher groups frames into
//! chunks of `chunk_size` frames and hands each complete chunk back to the caller, which
//! forwards it to the chunk sink.

use std::collections::VecDeque;

/// Groups fixed-size generation frames into chunks.
///
/// ## Memory Management:
/// Holds at most one chunk worth of frames; a full chunk is drained out immediately.
#[derive(Debug)]
pub struct FrameBatcher {
    /// Frames waiting to be emitted
    pending: VecDeque<Vec<f32>>,

    /// Number of frames per emitted chunk (at least 1)
    chunk_size: usize,

    /// Frames pushed since creation
    frames_seen: usize,
}

impl FrameBatcher {
    /// Create a batcher emitting `chunk_size` frames at a time.
    ///
    /// A `chunk_size` of 0 is treated as 1 so that every frame is still delivered.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            pending: VecDeque::with_capacity(chunk_size),
            chunk_size,
            frames_seen: 0,
        }
    }

    /// Add one frame. Returns the samples of a complete chunk when this frame fills it.
    pub fn push_frame(&mut self, frame: Vec<f32>) -> Option<Vec<f32>> {
        self.frames_seen += 1;
        self.pending.push_back(frame);

        if self.pending.len() >= self.chunk_size {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Flush whatever is left. Returns `None` when nothing is pending.
    pub fn finish(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.drain())
        }
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    fn drain(&mut self) -> Vec<f32> {
        let total = self.pending.iter().map(Vec::len).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in self.pending.drain(..) {
            samples.extend(frame);
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_every_chunk_size_frames() {
        let mut batcher = FrameBatcher::new(3);
        assert!(batcher.push_frame(vec![0.1; 4]).is_none());
        assert!(batcher.push_frame(vec![0.2; 4]).is_none());

        let chunk = batcher.push_frame(vec![0.3; 4]).unwrap();
        assert_eq!(chunk.len(), 12);
        assert_eq!(chunk[0], 0.1);
        assert_eq!(chunk[11], 0.3);

        assert!(batcher.finish().is_none());
        assert_eq!(batcher.frames_seen(), 3);
    }

    #[test]
    fn test_finish_flushes_partial_chunk() {
        let mut batcher = FrameBatcher::new(25);
        batcher.push_frame(vec![0.5; 10]);
        assert_eq!(batcher.finish().map(|c| c.len()), Some(10));
        assert!(batcher.finish().is_none());
    }

    #[test]
    fn test_zero_chunk_size_emits_each_frame() {
        let mut batcher = FrameBatcher::new(0);
        assert!(batcher.push_frame(vec![0.0; 2]).is_some());
    }
}
