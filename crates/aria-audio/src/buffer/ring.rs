//! Lock-free ring buffer between the decode worker and the output callback.
//!
//! Single-producer, single-consumer: the worker thread writes decoded
//! samples and the audio callback reads them. The consumer side keeps a
//! monotonic count of samples ever read, which the sink turns into a
//! device frame position. [`RingBuffer::clear`] is the one exception to
//! the two-thread contract: control threads may discard pending samples
//! at any time, so the consumer advances its cursor with a CAS and a
//! racing clear wins.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free single-producer, single-consumer ring buffer of f32 samples.
///
/// Uses atomic positions for thread-safe read/write without locks;
/// allocations never happen in the hot path.
pub struct RingBuffer {
    /// The underlying buffer storage.
    buffer: Box<[f32]>,
    /// Current read position (monotonic, wrapped by masking).
    read_pos: AtomicUsize,
    /// Current write position (monotonic, wrapped by masking).
    write_pos: AtomicUsize,
    /// Buffer capacity (power of 2 for efficient modulo).
    capacity: usize,
    /// Mask for efficient modulo (capacity - 1).
    mask: usize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity.
    ///
    /// The capacity will be rounded up to the next power of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        let buffer = vec![0.0f32; capacity].into_boxed_slice();

        Self {
            buffer,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    /// Get the buffer capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of samples available for reading.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Get the number of free slots for writing.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Check if the buffer is full.
    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Total number of samples ever consumed by the reader.
    ///
    /// Monotonic across [`Self::clear`], which discards pending samples
    /// by counting them as consumed; callers that need a position that
    /// survives a flush must rebase externally.
    pub fn consumed(&self) -> u64 {
        self.read_pos.load(Ordering::Acquire) as u64
    }

    /// Write samples to the buffer.
    ///
    /// Returns the number of samples actually written.
    /// This method is designed to be called from the producer thread.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        let available_space = self.capacity - write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(available_space);

        if to_write == 0 {
            return 0;
        }

        let start_idx = write_pos & self.mask;
        let end_idx = (write_pos + to_write) & self.mask;

        // SAFETY: We're the only writer and we've checked bounds
        let buffer_ptr = self.buffer.as_ptr().cast_mut();

        #[allow(unsafe_code)]
        if start_idx < end_idx || to_write <= self.capacity - start_idx {
            // Contiguous write
            // SAFETY: We're the only writer and indices are within bounds
            unsafe {
                std::ptr::copy_nonoverlapping(
                    samples.as_ptr(),
                    buffer_ptr.add(start_idx),
                    to_write,
                );
            }
        } else {
            // Wrap-around write
            let first_chunk = self.capacity - start_idx;
            // SAFETY: We're the only writer and indices are within bounds
            unsafe {
                std::ptr::copy_nonoverlapping(
                    samples.as_ptr(),
                    buffer_ptr.add(start_idx),
                    first_chunk,
                );
                std::ptr::copy_nonoverlapping(
                    samples.as_ptr().add(first_chunk),
                    buffer_ptr,
                    to_write - first_chunk,
                );
            }
        }

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    /// Read samples from the buffer.
    ///
    /// Returns the number of samples actually read.
    /// This method is designed to be called from the consumer thread.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        let available = write_pos.wrapping_sub(read_pos);
        let to_read = output.len().min(available);

        if to_read == 0 {
            return 0;
        }

        let start_idx = read_pos & self.mask;

        // SAFETY: We're the only reader and we've checked bounds
        let buffer_ptr = self.buffer.as_ptr();

        #[allow(unsafe_code)]
        if start_idx + to_read <= self.capacity {
            // Contiguous read
            // SAFETY: We're the only reader and indices are within bounds
            unsafe {
                std::ptr::copy_nonoverlapping(
                    buffer_ptr.add(start_idx),
                    output.as_mut_ptr(),
                    to_read,
                );
            }
        } else {
            // Wrap-around read
            let first_chunk = self.capacity - start_idx;
            // SAFETY: We're the only reader and indices are within bounds
            unsafe {
                std::ptr::copy_nonoverlapping(
                    buffer_ptr.add(start_idx),
                    output.as_mut_ptr(),
                    first_chunk,
                );
                std::ptr::copy_nonoverlapping(
                    buffer_ptr,
                    output.as_mut_ptr().add(first_chunk),
                    to_read - first_chunk,
                );
            }
        }

        // Advance with a CAS: a concurrent clear() already moved the
        // cursor past these samples and must not be rolled back. The
        // copied samples were pending at the time of the clear, so the
        // consumed count stays accurate either way.
        let _ = self.read_pos.compare_exchange(
            read_pos,
            read_pos.wrapping_add(to_read),
            Ordering::Release,
            Ordering::Relaxed,
        );

        to_read
    }

    /// Discard all pending samples.
    ///
    /// Unlike [`Self::read`] this may be called from any thread; a read
    /// in flight on the consumer thread cannot rewind the cursor past a
    /// clear.
    pub fn clear(&self) {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        self.read_pos.store(write_pos, Ordering::Release);
    }
}

// SAFETY: RingBuffer is safe to share between threads (Send + Sync).
// The producer and consumer operate on different positions with atomic
// ordering, so no data races occur between the single producer and the
// single consumer.
#[allow(unsafe_code)]
unsafe impl Send for RingBuffer {}
#[allow(unsafe_code)]
unsafe impl Sync for RingBuffer {}
