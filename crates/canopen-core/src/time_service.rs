//! TIME stamp production and consumption (CiA-301 §7.2.6).

use crate::dict::{DataType, TimeStamp48, Value};
use crate::frame::{Frame, FrameFlags};

/// The default TIME COB-ID.
pub const DEFAULT_TIME_COB_ID: u32 = 0x100;

/// Produces TIME frames carrying an absolute time-of-day.
#[derive(Debug)]
pub struct TimeProducer {
	cob_id: u32,
}

impl TimeProducer {
	/// A producer emitting on `cob_id`.
	pub fn new(cob_id: u32) -> Self {
		Self { cob_id }
	}

	/// Build the TIME frame for `time`.
	pub fn produce(&self, time: TimeStamp48) -> Frame {
		let mut data = Vec::with_capacity(6);
		Value::TimeOfDay(time).encode(&mut data);
		Frame::new(self.cob_id, FrameFlags::empty(), &data).expect("TIME_OF_DAY is always 6 bytes")
	}
}

/// Consumes TIME frames, delivering parsed absolute times.
#[derive(Debug)]
pub struct TimeConsumer {
	cob_id: u32,
}

impl TimeConsumer {
	/// Listen for TIME frames on `cob_id`.
	pub fn new(cob_id: u32) -> Self {
		Self { cob_id }
	}

	/// Feed a candidate frame, returning the decoded time if it matched this consumer's
	/// COB-ID and carried a well-formed payload.
	pub fn handle_frame(&self, frame: &Frame) -> Option<TimeStamp48> {
		if frame.id() != self.cob_id {
			return None;
		}
		match Value::decode(DataType::TimeOfDay, frame.data()).ok()? {
			Value::TimeOfDay(stamp) => Some(stamp),
			_ => None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn round_trips_through_frame() {
		let producer = TimeProducer::new(DEFAULT_TIME_COB_ID);
		let consumer = TimeConsumer::new(DEFAULT_TIME_COB_ID);
		let stamp = TimeStamp48 { ms_since_midnight: 12_345, days: 14_000 };
		let frame = producer.produce(stamp);
		assert!(consumer.handle_frame(&frame) == Some(stamp));
	}

	#[test]
	fn consumer_ignores_other_cob_ids() {
		let consumer = TimeConsumer::new(DEFAULT_TIME_COB_ID);
		let frame = Frame::new(0x101, FrameFlags::empty(), &[0; 6]).unwrap();
		assert!(consumer.handle_frame(&frame).is_none());
	}
}
