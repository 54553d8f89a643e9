//! Receive- and transmit-PDO execution: frame decode/encode against mapped sub-objects.

use crate::dict::Device;
use crate::frame::{Frame, FrameFlags};
use crate::timer::Timestamp;

use super::mapping::{validate_mapping, ConfigError, PdoMapEntry, TransmissionType};

/// An opaque handle to a registered RPDO.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RpdoId(usize);

/// An opaque handle to a registered TPDO.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TpdoId(usize);

/// A received frame's length did not match its RPDO's mapping.
///
/// The caller is expected to push emergency code `0x8210` (see [`PDO_LENGTH_ERROR_CODE`])
/// and must not deliver the frame's payload to the mapped sub-objects.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
#[error("RPDO {cob_id:08X} expected {expected} bytes, got {actual}")]
pub struct PdoLengthMismatch {
	/// The RPDO's COB-ID.
	pub cob_id: u32,
	/// The byte length its mapping requires.
	pub expected: usize,
	/// The byte length the received frame actually carried.
	pub actual: usize,
}

/// The emergency error code CiA-301 assigns to a PDO length mismatch.
pub const PDO_LENGTH_ERROR_CODE: u16 = 0x8210;

#[derive(Debug)]
struct Rpdo {
	cob_id: u32,
	entries: Vec<PdoMapEntry>,
	total_bits: u32,
}

/// Configuration for one transmit-PDO, matching its communication and mapping parameter
/// records.
#[derive(Debug, Clone)]
pub struct TpdoConfig {
	/// The COB-ID this TPDO transmits on.
	pub cob_id: u32,
	/// How this TPDO is triggered.
	pub transmission_type: TransmissionType,
	/// Minimum spacing between transmissions, in units of 100 microseconds. `0` disables the
	/// inhibit window.
	pub inhibit_time_100us: u16,
	/// For event-driven TPDOs, the maximum time between transmissions in milliseconds. `0`
	/// disables the event timer.
	pub event_timer_ms: u32,
	/// For cyclic-synchronous TPDOs, the SYNC counter value this TPDO starts counting from.
	pub sync_start: u8,
	/// The mapped sub-objects, in payload order.
	pub entries: Vec<PdoMapEntry>,
}

#[derive(Debug)]
struct Tpdo {
	cob_id: u32,
	transmission_type: TransmissionType,
	inhibit_time_100us: u16,
	event_timer_ms: u32,
	entries: Vec<PdoMapEntry>,
	total_bits: u32,
	last_send: Option<Timestamp>,
	sync_count: u8,
	pending: bool,
}

/// Executes a device's configured RPDOs and TPDOs.
///
/// Sans-io: frames in and out are plain [`Frame`] values, and time only advances when the host
/// calls [`Self::on_sync`] or [`Self::flush_pending`] with the current clock.
#[derive(Debug, Default)]
pub struct PdoEngine {
	rpdos: Vec<Rpdo>,
	tpdos: Vec<Tpdo>,
}

impl PdoEngine {
	/// A fresh engine with no PDOs configured.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a receive-PDO. Validates the mapping against `device` before installing it.
	pub fn add_rpdo(&mut self, cob_id: u32, entries: Vec<PdoMapEntry>, device: &Device) -> Result<RpdoId, ConfigError> {
		let total_bits = validate_mapping(&entries, device)?;
		self.rpdos.push(Rpdo { cob_id, entries, total_bits });
		Ok(RpdoId(self.rpdos.len() - 1))
	}

	/// Register a transmit-PDO. Validates the mapping against `device` before installing it.
	pub fn add_tpdo(&mut self, config: TpdoConfig, device: &Device) -> Result<TpdoId, ConfigError> {
		let total_bits = validate_mapping(&config.entries, device)?;
		self.tpdos.push(Tpdo {
			cob_id: config.cob_id,
			transmission_type: config.transmission_type,
			inhibit_time_100us: config.inhibit_time_100us,
			event_timer_ms: config.event_timer_ms,
			entries: config.entries,
			total_bits,
			last_send: None,
			sync_count: 0,
			pending: false,
		});
		Ok(TpdoId(self.tpdos.len() - 1))
	}

	/// Decode an incoming frame into its matching RPDO's mapped sub-objects, if any RPDO is
	/// registered for the frame's identifier.
	///
	/// Returns `Ok(false)` if no RPDO matches `frame`'s COB-ID. On a length mismatch the
	/// payload is NOT delivered and [`PdoLengthMismatch`] is returned for the caller to turn
	/// into an emergency push.
	pub fn handle_frame(&mut self, device: &mut Device, frame: &Frame) -> Result<bool, PdoLengthMismatch> {
		let Some(rpdo) = self.rpdos.iter().find(|rpdo| rpdo.cob_id == frame.id()) else {
			return Ok(false);
		};
		let expected = (rpdo.total_bits as usize).div_ceil(8);
		let data = frame.data();
		if data.len() != expected {
			return Err(PdoLengthMismatch { cob_id: rpdo.cob_id, expected, actual: data.len() });
		}

		let mut bit_offset = 0u32;
		for entry in &rpdo.entries {
			let raw = read_bits(data, bit_offset, entry.bit_length);
			let byte_len = (entry.bit_length as usize).div_ceil(8).max(1);
			let bytes = raw.to_le_bytes();
			if let Some(object) = device.object_mut(entry.idx) {
				if let Some(sub) = object.sub_mut(entry.subidx) {
					if let Err(error) = sub.download_indication(&bytes[..byte_len]) {
						log::warn!("RPDO {:08X}: writing {:04X}:{:02X} failed: {error}", rpdo.cob_id, entry.idx, entry.subidx);
					}
				}
			}
			bit_offset += entry.bit_length as u32;
		}
		Ok(true)
	}

	/// Mark an event-driven or acyclic-synchronous TPDO as having data ready to send. The
	/// caller should follow up with [`Self::flush_pending`] to respect the inhibit window.
	pub fn mark_event(&mut self, id: TpdoId) {
		if let Some(tpdo) = self.tpdos.get_mut(id.0) {
			tpdo.pending = true;
		}
	}

	/// Advance the SYNC counter and transmit every cyclic-synchronous TPDO due at this count,
	/// along with any acyclic-synchronous TPDO with a pending event.
	pub fn on_sync(&mut self, device: &Device, now: Timestamp) -> Vec<Frame> {
		let mut frames = Vec::new();
		for tpdo in &mut self.tpdos {
			let due = match tpdo.transmission_type.cyclic_sync_count() {
				Some(n) => {
					tpdo.sync_count = tpdo.sync_count.wrapping_add(1);
					tpdo.sync_count >= n
				}
				None => tpdo.transmission_type.is_acyclic_sync() && tpdo.pending,
			};
			if !due {
				continue;
			}
			if tpdo.transmission_type.cyclic_sync_count().is_some() {
				tpdo.sync_count = 0;
			}
			if let Some(frame) = send_tpdo(tpdo, device, now) {
				frames.push(frame);
			}
		}
		frames
	}

	/// Transmit any event-driven TPDO whose inhibit window has elapsed since it was marked
	/// pending via [`Self::mark_event`].
	pub fn flush_pending(&mut self, device: &Device, now: Timestamp) -> Vec<Frame> {
		let mut frames = Vec::new();
		for tpdo in &mut self.tpdos {
			if !tpdo.pending || !tpdo.transmission_type.is_event_driven() {
				continue;
			}
			let inhibited = match (tpdo.last_send, tpdo.inhibit_time_100us) {
				(Some(last), inhibit) if inhibit > 0 => now.saturating_sub(last) < inhibit as u64 * 100,
				_ => false,
			};
			if inhibited {
				continue;
			}
			if let Some(frame) = send_tpdo(tpdo, device, now) {
				frames.push(frame);
			}
		}
		frames
	}
}

fn send_tpdo(tpdo: &mut Tpdo, device: &Device, now: Timestamp) -> Option<Frame> {
	let byte_len = (tpdo.total_bits as usize).div_ceil(8);
	let mut data = vec![0u8; byte_len];
	let mut bit_offset = 0u32;
	for entry in &tpdo.entries {
		let object = device.object(entry.idx)?;
		let sub = object.sub(entry.subidx)?;
		let Ok(encoded) = sub.read_value() else { continue };
		let mut buf = [0u8; 8];
		let len = encoded.len().min(8);
		buf[..len].copy_from_slice(&encoded[..len]);
		let raw = u64::from_le_bytes(buf);
		write_bits(&mut data, bit_offset, entry.bit_length, raw);
		bit_offset += entry.bit_length as u32;
	}
	tpdo.last_send = Some(now);
	tpdo.pending = false;
	Some(Frame::new(tpdo.cob_id, FrameFlags::empty(), &data).expect("mapping validation keeps payload within 8 bytes"))
}

fn read_bits(data: &[u8], bit_offset: u32, bit_len: u8) -> u64 {
	let mut value: u64 = 0;
	for i in 0..bit_len as u32 {
		let bit_idx = bit_offset + i;
		let byte = data.get((bit_idx / 8) as usize).copied().unwrap_or(0);
		let bit = (byte >> (bit_idx % 8)) & 1;
		value |= (bit as u64) << i;
	}
	value
}

fn write_bits(data: &mut [u8], bit_offset: u32, bit_len: u8, value: u64) {
	for i in 0..bit_len as u32 {
		let bit_idx = bit_offset + i;
		let byte_idx = (bit_idx / 8) as usize;
		let Some(byte) = data.get_mut(byte_idx) else { break };
		let bit = ((value >> i) & 1) as u8;
		if bit != 0 {
			*byte |= 1 << (bit_idx % 8);
		} else {
			*byte &= !(1 << (bit_idx % 8));
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dict::{Access, Device, Object, ObjectCode, SubObject, Value};
	use assert2::assert;

	fn device_with_u32(idx: u16, value: u32) -> Device {
		let sub = SubObject::new(0, Access::ReadWrite, true, Value::Unsigned32(value));
		let object = Object::new(idx, ObjectCode::Var).with_sub(sub);
		Device::new(1, 0, 0, 0).unwrap().with_object(object).unwrap()
	}

	#[test]
	fn rpdo_writes_mapped_object_on_matching_frame() {
		let mut device = device_with_u32(0x2000, 0);
		let mut engine = PdoEngine::new();
		engine.add_rpdo(0x200, vec![PdoMapEntry { idx: 0x2000, subidx: 0, bit_length: 32 }], &device).unwrap();

		let frame = Frame::new(0x200, FrameFlags::empty(), &0xDEADBEEFu32.to_le_bytes()).unwrap();
		let handled = engine.handle_frame(&mut device, &frame).unwrap();
		assert!(handled);
		assert!(*device.object(0x2000).unwrap().sub(0).unwrap().value() == Value::Unsigned32(0xDEADBEEF));
	}

	#[test]
	fn rpdo_length_mismatch_is_reported_and_not_applied() {
		let mut device = device_with_u32(0x2000, 0x1234);
		let mut engine = PdoEngine::new();
		engine.add_rpdo(0x200, vec![PdoMapEntry { idx: 0x2000, subidx: 0, bit_length: 32 }], &device).unwrap();

		let frame = Frame::new(0x200, FrameFlags::empty(), &[1, 2, 3]).unwrap();
		let error = engine.handle_frame(&mut device, &frame).unwrap_err();
		assert!(error.expected == 4);
		assert!(error.actual == 3);
		assert!(*device.object(0x2000).unwrap().sub(0).unwrap().value() == Value::Unsigned32(0x1234));
	}

	#[test]
	fn tpdo_transmits_on_nth_sync() {
		let device = device_with_u32(0x2001, 7);
		let mut engine = PdoEngine::new();
		let config = TpdoConfig {
			cob_id: 0x180,
			transmission_type: TransmissionType::cyclic_sync(2).unwrap(),
			inhibit_time_100us: 0,
			event_timer_ms: 0,
			sync_start: 0,
			entries: vec![PdoMapEntry { idx: 0x2001, subidx: 0, bit_length: 32 }],
		};
		engine.add_tpdo(config, &device).unwrap();

		assert!(engine.on_sync(&device, 0).is_empty());
		let frames = engine.on_sync(&device, 1);
		assert!(frames.len() == 1);
		assert!(frames[0].data() == 7u32.to_le_bytes());
	}

	#[test]
	fn event_driven_tpdo_respects_inhibit_window() {
		let device = device_with_u32(0x2002, 1);
		let mut engine = PdoEngine::new();
		let config = TpdoConfig {
			cob_id: 0x181,
			transmission_type: TransmissionType::event_driven(false),
			inhibit_time_100us: 10,
			event_timer_ms: 0,
			sync_start: 0,
			entries: vec![PdoMapEntry { idx: 0x2002, subidx: 0, bit_length: 32 }],
		};
		let id = engine.add_tpdo(config, &device).unwrap();

		engine.mark_event(id);
		let frames = engine.flush_pending(&device, 0);
		assert!(frames.len() == 1);

		engine.mark_event(id);
		assert!(engine.flush_pending(&device, 500).is_empty());
		assert!(engine.flush_pending(&device, 1000).len() == 1);
	}
}
