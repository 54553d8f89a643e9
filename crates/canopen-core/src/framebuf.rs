//! A single-producer/single-consumer lock-free circular buffer of [`Frame`]s.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::frame::Frame;

/// A fixed-capacity, lock-free, single-producer/single-consumer queue of frames.
///
/// The capacity is always `2^k - 1` for the `k` passed to [`FrameBuf::with_capacity_log2`]:
/// one slot is permanently reserved so that the full and empty states can be told apart
/// without an extra flag, matching the invariant `size() + capacity() == 2^k - 1`.
pub struct FrameBuf {
	mask: usize,
	slots: Box<[UnsafeCell<MaybeUninit<Frame>>]>,
	// Index of the next slot to write. Only the producer writes this.
	head: AtomicUsize,
	// Index of the next slot to read. Only the consumer writes this.
	tail: AtomicUsize,
}

// SAFETY: `FrameBuf` is safe to share between exactly one producer thread and one consumer
// thread: the producer only touches `head` (and reads `tail`), the consumer only touches
// `tail` (and reads `head`), and each slot is written by the producer strictly before the
// consumer observes the `head` increment that makes it visible, and read by the consumer
// strictly before the producer observes the `tail` increment that frees it.
unsafe impl Send for FrameBuf {}
unsafe impl Sync for FrameBuf {}

impl FrameBuf {
	/// Create a new buffer with capacity `2^log2_capacity - 1`.
	///
	/// # Panics
	/// Panics if `log2_capacity` is 0 or large enough to overflow `usize`.
	pub fn with_capacity_log2(log2_capacity: u32) -> Self {
		assert!(log2_capacity > 0, "log2_capacity must be at least 1");
		let slot_count = 1usize << log2_capacity;
		let mut slots = Vec::with_capacity(slot_count);
		for _ in 0..slot_count {
			slots.push(UnsafeCell::new(MaybeUninit::uninit()));
		}
		Self {
			mask: slot_count - 1,
			slots: slots.into_boxed_slice(),
			head: AtomicUsize::new(0),
			tail: AtomicUsize::new(0),
		}
	}

	/// The number of frames the buffer can hold at once.
	pub fn capacity(&self) -> usize {
		self.mask
	}

	/// The number of frames currently queued.
	pub fn len(&self) -> usize {
		let head = self.head.load(Ordering::Acquire);
		let tail = self.tail.load(Ordering::Acquire);
		head.wrapping_sub(tail) & self.mask
	}

	/// True if the buffer holds no frames.
	pub fn is_empty(&self) -> bool {
		self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
	}

	/// True if the buffer is at capacity; the next [`Self::push`] would fail.
	pub fn is_full(&self) -> bool {
		let head = self.head.load(Ordering::Acquire);
		let tail = self.tail.load(Ordering::Acquire);
		self.slot_index(head.wrapping_add(1)) == self.slot_index(tail)
	}

	fn slot_index(&self, raw: usize) -> usize {
		raw & self.mask
	}

	/// Push a frame onto the buffer. Returns the frame back if the buffer is full.
	///
	/// Must only ever be called from the single producer.
	pub fn push(&self, frame: Frame) -> Result<(), Frame> {
		let head = self.head.load(Ordering::Relaxed);
		let tail = self.tail.load(Ordering::Acquire);
		let next = head.wrapping_add(1);
		if self.slot_index(next) == self.slot_index(tail) {
			return Err(frame);
		}
		// SAFETY: only the producer writes to this slot, and only after observing (via
		// `tail`) that the consumer is done reading it from a previous lap.
		unsafe {
			(*self.slots[self.slot_index(head)].get()).write(frame);
		}
		self.head.store(next, Ordering::Release);
		Ok(())
	}

	/// Pop the oldest frame off the buffer, if any.
	///
	/// Must only ever be called from the single consumer.
	pub fn pop(&self) -> Option<Frame> {
		let tail = self.tail.load(Ordering::Relaxed);
		let head = self.head.load(Ordering::Acquire);
		if self.slot_index(tail) == self.slot_index(head) {
			return None;
		}
		// SAFETY: the producer published this slot by incrementing `head` with Release
		// ordering before we observed it with Acquire above; only the consumer reads it.
		let frame = unsafe { (*self.slots[self.slot_index(tail)].get()).assume_init_read() };
		self.tail.store(tail.wrapping_add(1), Ordering::Release);
		Some(frame)
	}
}

impl std::fmt::Debug for FrameBuf {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameBuf")
			.field("capacity", &self.capacity())
			.field("len", &self.len())
			.finish()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;
	use crate::frame::FrameFlags;

	fn frame(id: u32) -> Frame {
		Frame::new(id, FrameFlags::empty(), &[]).unwrap()
	}

	#[test]
	fn capacity_is_one_less_than_power_of_two() {
		let buf = FrameBuf::with_capacity_log2(3);
		assert!(buf.capacity() == 7);
	}

	#[test]
	fn empty_iff_size_zero() {
		let buf = FrameBuf::with_capacity_log2(2);
		assert!(buf.is_empty());
		assert!(buf.len() == 0);
		buf.push(frame(1)).unwrap();
		assert!(!buf.is_empty());
	}

	#[test]
	fn size_plus_capacity_invariant() {
		let buf = FrameBuf::with_capacity_log2(2);
		for i in 0..buf.capacity() {
			buf.push(frame(i as u32)).unwrap();
		}
		assert!(buf.is_full());
		assert!(buf.push(frame(99)).is_err());
	}

	#[test]
	fn fifo_order() {
		let buf = FrameBuf::with_capacity_log2(3);
		for i in 0..5 {
			buf.push(frame(i)).unwrap();
		}
		for i in 0..5 {
			assert!(buf.pop().unwrap().id() == i);
		}
		assert!(buf.pop().is_none());
	}

	#[test]
	fn wraps_around() {
		let buf = FrameBuf::with_capacity_log2(2);
		for round in 0..10u32 {
			buf.push(frame(round)).unwrap();
			assert!(buf.pop().unwrap().id() == round);
		}
	}
}
