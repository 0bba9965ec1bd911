//! Frame ring buffer shared by the render producer and the hardware callback.
//!
//! Built on `ringbuf`'s lock-free SPSC storage and split into a writer and a
//! reader half, so the single-producer/single-consumer rule is enforced by
//! ownership. Cursor publication uses release/acquire ordering inside
//! `ringbuf`; the sample region itself is never locked.
//!
//! One frame of the allocated capacity is never handed to the writer, so
//! `readable + writable == capacity - 1` holds at all times and a buffer
//! allocated with `n + 1` frames holds at most `n`.

use std::mem::MaybeUninit;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use super::{Frame, SILENCE};

pub struct RingBuffer;

impl RingBuffer {
    /// Allocates a ring of `capacity_frames` frames (at least two).
    pub fn with_capacity(capacity_frames: usize) -> (RingWriter, RingReader) {
        let capacity = capacity_frames.max(2);
        let (prod, cons) = HeapRb::<Frame>::new(capacity).split();
        (
            RingWriter {
                inner: prod,
                capacity,
                initialized: 0,
            },
            RingReader {
                inner: cons,
                capacity,
            },
        )
    }

    /// Allocates a ring able to hold `latency_frames` frames of audio.
    pub fn for_latency(latency_frames: u32) -> (RingWriter, RingReader) {
        Self::with_capacity(latency_frames as usize + 1)
    }
}

pub struct WriteRegion<'a> {
    pub frames: &'a mut [Frame],
    /// The region covers all space currently writable.
    pub contiguous: bool,
}

pub struct RingWriter {
    inner: HeapProd<Frame>,
    capacity: usize,
    /// Slots past the write index filled by the last `write_region`.
    initialized: usize,
}

impl RingWriter {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn readable(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn writable(&self) -> usize {
        self.inner.vacant_len().saturating_sub(1)
    }

    /// Contiguous writable frames, pre-filled with silence.
    pub fn write_region(&mut self) -> WriteRegion<'_> {
        let writable = self.writable();
        let (head, _) = self.inner.vacant_slices_mut();
        let len = head.len().min(writable);
        let head = &mut head[..len];
        for slot in head.iter_mut() {
            slot.write(SILENCE);
        }
        // SAFETY: every slot of `head` has been initialized just above and
        // `MaybeUninit<Frame>` has the same layout as `Frame`.
        let frames = unsafe { &mut *(head as *mut [MaybeUninit<Frame>] as *mut [Frame]) };
        self.initialized = len;
        WriteRegion {
            frames,
            contiguous: len == writable,
        }
    }

    /// Commits up to `count` frames of the last write region. Frames past
    /// that region are never committed.
    pub fn advance_write(&mut self, count: usize) {
        let count = count.min(self.initialized);
        // SAFETY: `count` slots past the write index were initialized by
        // `write_region`, which also kept them clear of the reserved frame.
        unsafe { self.inner.advance_write_index(count) };
        self.initialized -= count;
    }

    /// Copies as many frames as fit and commits them.
    #[cfg(test)]
    pub fn push_frames(&mut self, frames: &[Frame]) -> usize {
        let count = frames.len().min(self.writable());
        self.initialized = 0;
        self.inner.push_slice(&frames[..count])
    }
}

pub struct RingReader {
    inner: HeapCons<Frame>,
    capacity: usize,
}

impl RingReader {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn readable(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn writable(&self) -> usize {
        self.inner.vacant_len().saturating_sub(1)
    }

    /// Contiguous readable frames.
    pub fn read_region(&self) -> &[Frame] {
        self.inner.as_slices().0
    }

    /// Releases `count` frames of the last read region back to the writer.
    pub fn advance_read(&mut self, count: usize) {
        let count = count.min(self.readable());
        // SAFETY: `count` never exceeds the occupied length.
        unsafe { self.inner.advance_read_index(count) };
    }
}
