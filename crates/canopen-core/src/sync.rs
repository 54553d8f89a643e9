//! SYNC production and consumption (CiA-301 §7.2.5).

use crate::frame::{Frame, FrameFlags};

/// The default SYNC COB-ID.
pub const DEFAULT_SYNC_COB_ID: u32 = 0x80;

/// Produces SYNC frames, optionally carrying an incrementing counter.
#[derive(Debug)]
pub struct SyncProducer {
	cob_id: u32,
	counter: Option<u8>,
	max: u8,
}

impl SyncProducer {
	/// A producer that emits SYNC frames with no counter byte.
	pub fn new(cob_id: u32) -> Self {
		Self { cob_id, counter: None, max: 0 }
	}

	/// A producer that emits SYNC frames carrying a 1-byte counter incrementing from `1` to
	/// `max` before wrapping back to `1`.
	pub fn with_counter(cob_id: u32, max: u8) -> Self {
		Self { cob_id, counter: Some(0), max: max.max(1) }
	}

	/// Produce the next SYNC frame, advancing the counter if one is configured.
	pub fn produce(&mut self) -> Frame {
		match &mut self.counter {
			None => Frame::new(self.cob_id, FrameFlags::empty(), &[]).expect("empty payload always fits"),
			Some(counter) => {
				*counter = if *counter >= self.max { 1 } else { *counter + 1 };
				Frame::new(self.cob_id, FrameFlags::empty(), &[*counter]).expect("single byte always fits")
			}
		}
	}
}

/// Consumes SYNC frames, latching the counter (if present) for phase-aligning synchronous
/// PDOs.
#[derive(Debug)]
pub struct SyncConsumer {
	cob_id: u32,
	counter: Option<u8>,
}

impl SyncConsumer {
	/// Listen for SYNC frames on `cob_id`.
	pub fn new(cob_id: u32) -> Self {
		Self { cob_id, counter: None }
	}

	/// The most recently latched counter value, if any SYNC frame carrying one has arrived.
	pub fn counter(&self) -> Option<u8> {
		self.counter
	}

	/// Feed a candidate frame. Returns `Some` (possibly containing `None` for a counter-less
	/// SYNC) if `frame` matched this consumer's COB-ID.
	pub fn handle_frame(&mut self, frame: &Frame) -> Option<Option<u8>> {
		if frame.id() != self.cob_id {
			return None;
		}
		let data = frame.data();
		let counter = match data.len() {
			0 => None,
			1 => Some(data[0]),
			_ => return None,
		};
		self.counter = counter;
		Some(counter)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn counter_wraps_at_configured_max() {
		let mut producer = SyncProducer::with_counter(DEFAULT_SYNC_COB_ID, 3);
		assert!(producer.produce().data() == [1]);
		assert!(producer.produce().data() == [2]);
		assert!(producer.produce().data() == [3]);
		assert!(producer.produce().data() == [1]);
	}

	#[test]
	fn counter_less_sync_has_empty_payload() {
		let mut producer = SyncProducer::new(DEFAULT_SYNC_COB_ID);
		assert!(producer.produce().data().is_empty());
	}

	#[test]
	fn consumer_latches_counter_from_matching_frame() {
		let mut consumer = SyncConsumer::new(DEFAULT_SYNC_COB_ID);
		let frame = Frame::new(DEFAULT_SYNC_COB_ID, FrameFlags::empty(), &[7]).unwrap();
		assert!(consumer.handle_frame(&frame) == Some(Some(7)));
		assert!(consumer.counter() == Some(7));
	}

	#[test]
	fn consumer_ignores_other_cob_ids() {
		let mut consumer = SyncConsumer::new(DEFAULT_SYNC_COB_ID);
		let frame = Frame::new(0x81, FrameFlags::empty(), &[7]).unwrap();
		assert!(consumer.handle_frame(&frame).is_none());
	}
}
