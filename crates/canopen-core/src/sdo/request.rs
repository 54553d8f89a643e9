//! Scatter/gather buffer backing an in-flight SDO transfer.

use crate::crc::Crc16;

/// Accumulates bytes streamed in through SDO segments or block sub-blocks and exposes a
/// contiguous view once the transfer finishes.
///
/// Unlike unconditional repeated `Vec::extend`, `RequestBuffer` tracks whether the total size
/// was announced up front (from the initiate frame) and runs an incremental CRC-16-CCITT over
/// every byte appended, so block-mode transfers never need a second pass over the data to
/// verify it.
#[derive(Clone, Debug, Default)]
pub struct RequestBuffer {
	data: Vec<u8>,
	announced_size: Option<u32>,
	crc: Crc16,
	finalized: bool,
}

impl RequestBuffer {
	/// A fresh, empty buffer.
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the size announced by the initiate frame, if any.
	pub fn set_announced_size(&mut self, size: u32) {
		self.announced_size = Some(size);
		self.data.reserve(size as usize);
	}

	/// The announced size, if the initiate frame carried one.
	pub fn announced_size(&self) -> Option<u32> {
		self.announced_size
	}

	/// Append bytes, updating the running CRC.
	pub fn append(&mut self, bytes: &[u8]) {
		self.crc.update_slice(bytes);
		self.data.extend_from_slice(bytes);
	}

	/// Mark the transfer complete; no further appends are expected.
	pub fn finalize(&mut self) {
		self.finalized = true;
	}

	/// Whether [`Self::finalize`] has been called.
	pub fn is_finalized(&self) -> bool {
		self.finalized
	}

	/// The bytes accumulated so far.
	pub fn bytes(&self) -> &[u8] {
		&self.data
	}

	/// Take ownership of the accumulated bytes, leaving the buffer empty.
	pub fn take(&mut self) -> Vec<u8> {
		std::mem::take(&mut self.data)
	}

	/// The number of bytes accumulated so far.
	pub fn len(&self) -> usize {
		self.data.len()
	}

	/// Whether no bytes have been accumulated yet.
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// The CRC-16-CCITT of every byte appended so far.
	pub fn crc(&self) -> u16 {
		self.crc.get()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn accumulates_bytes_in_order() {
		let mut buf = RequestBuffer::new();
		buf.append(&[1, 2, 3]);
		buf.append(&[4, 5]);
		assert!(buf.bytes() == [1, 2, 3, 4, 5]);
	}

	#[test]
	fn crc_matches_known_check_value() {
		let mut buf = RequestBuffer::new();
		buf.append(b"123456789");
		assert!(buf.crc() == 0x31C3);
	}

	#[test]
	fn take_empties_buffer() {
		let mut buf = RequestBuffer::new();
		buf.append(&[9, 9]);
		let taken = buf.take();
		assert!(taken == [9, 9]);
		assert!(buf.is_empty());
	}
}
