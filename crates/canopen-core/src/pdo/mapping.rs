//! PDO mapping entries and transmission-type encoding (CiA-301 §7.3).

use crate::dict::Device;

/// One entry of a PDO mapping parameter record: the sub-object at `(idx, subidx)`, contributing
/// `bit_length` bits at this position in the frame payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PdoMapEntry {
	/// Mapped object index.
	pub idx: u16,
	/// Mapped sub-index.
	pub subidx: u8,
	/// Number of bits this entry occupies, in order, starting at the current bit cursor.
	pub bit_length: u8,
}

/// The transmission-type byte of a PDO communication parameter record.
///
/// A thin wrapper around the raw byte rather than an enum: several ranges (cyclic counts,
/// reserved values) carry a parameter, so a transparent newtype with named constructors and
/// predicates is a better fit than a closed set of variants.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct TransmissionType {
	raw: u8,
}

impl TransmissionType {
	/// Wrap a raw transmission-type byte without validating it.
	pub const fn from_u8(raw: u8) -> Self {
		Self { raw }
	}

	/// The raw transmission-type byte.
	pub const fn to_u8(self) -> u8 {
		self.raw
	}

	/// `0`: transmit on the next SYNC following a triggering event.
	pub const fn acyclic_sync() -> Self {
		Self::from_u8(0)
	}

	/// Whether this is the acyclic-synchronous type.
	pub const fn is_acyclic_sync(self) -> bool {
		self.raw == 0
	}

	/// `1..=240`: transmit every `n`-th SYNC.
	pub const fn cyclic_sync(n: u8) -> Option<Self> {
		if n >= 1 && n <= 240 {
			Some(Self::from_u8(n))
		} else {
			None
		}
	}

	/// The SYNC count `n` if this is a cyclic-synchronous type.
	pub const fn cyclic_sync_count(self) -> Option<u8> {
		if self.raw >= 1 && self.raw <= 240 {
			Some(self.raw)
		} else {
			None
		}
	}

	/// `252`: transmit once on the next SYNC following an RTR.
	pub const fn sync_rtr() -> Self {
		Self::from_u8(252)
	}

	/// Whether this is the synchronous-RTR type.
	pub const fn is_sync_rtr(self) -> bool {
		self.raw == 252
	}

	/// `253`: transmit immediately in response to an RTR.
	pub const fn async_rtr() -> Self {
		Self::from_u8(253)
	}

	/// Whether this is the asynchronous-RTR type.
	pub const fn is_async_rtr(self) -> bool {
		self.raw == 253
	}

	/// `254` or `255`: transmit on a manufacturer-specific or profile-specific event.
	pub const fn event_driven(profile_specific: bool) -> Self {
		if profile_specific {
			Self::from_u8(255)
		} else {
			Self::from_u8(254)
		}
	}

	/// Whether this is one of the event-driven types.
	pub const fn is_event_driven(self) -> bool {
		self.raw == 254 || self.raw == 255
	}
}

impl std::fmt::Debug for TransmissionType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let raw = self.raw;
		if self.is_acyclic_sync() {
			write!(f, "AcyclicSync(0x{raw:02X})")
		} else if let Some(n) = self.cyclic_sync_count() {
			write!(f, "CyclicSync({n}, 0x{raw:02X})")
		} else if self.is_sync_rtr() {
			write!(f, "SyncRtr(0x{raw:02X})")
		} else if self.is_async_rtr() {
			write!(f, "AsyncRtr(0x{raw:02X})")
		} else if self.is_event_driven() {
			write!(f, "EventDriven(0x{raw:02X})")
		} else {
			write!(f, "Reserved(0x{raw:02X})")
		}
	}
}

/// A mapping, or communication-parameter lookup, failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The mapping's cumulative bit length exceeds 64 bytes (512 bits).
	#[error("PDO mapping is {bits} bits, exceeding the 512-bit (64-byte) limit")]
	MappingTooLong {
		/// The cumulative bit length that was rejected.
		bits: u32,
	},

	/// A mapping entry names an object or sub-object that does not exist.
	#[error("mapped sub-object {idx:04X}:{subidx:02X} does not exist")]
	SubObjectMissing {
		/// The missing object's index.
		idx: u16,
		/// The missing object's sub-index.
		subidx: u8,
	},

	/// A mapping entry names a sub-object that is not flagged PDO-mappable.
	#[error("sub-object {idx:04X}:{subidx:02X} is not PDO-mappable")]
	NotPdoMappable {
		/// The offending object's index.
		idx: u16,
		/// The offending object's sub-index.
		subidx: u8,
	},
}

/// Validate a mapping against `device`, returning the cumulative bit length on success.
pub fn validate_mapping(entries: &[PdoMapEntry], device: &Device) -> Result<u32, ConfigError> {
	let mut total_bits: u32 = 0;
	for entry in entries {
		let object = device.object(entry.idx).ok_or(ConfigError::SubObjectMissing { idx: entry.idx, subidx: entry.subidx })?;
		let sub = object.sub(entry.subidx).ok_or(ConfigError::SubObjectMissing { idx: entry.idx, subidx: entry.subidx })?;
		if !sub.pdo_mappable() {
			return Err(ConfigError::NotPdoMappable { idx: entry.idx, subidx: entry.subidx });
		}
		total_bits += entry.bit_length as u32;
	}
	if total_bits > 512 {
		return Err(ConfigError::MappingTooLong { bits: total_bits });
	}
	Ok(total_bits)
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn transmission_type_classifies_ranges() {
		assert!(TransmissionType::acyclic_sync().is_acyclic_sync());
		assert!(TransmissionType::cyclic_sync(1).unwrap().cyclic_sync_count() == Some(1));
		assert!(TransmissionType::cyclic_sync(240).unwrap().cyclic_sync_count() == Some(240));
		assert!(TransmissionType::cyclic_sync(0).is_none());
		assert!(TransmissionType::cyclic_sync(241).is_none());
		assert!(TransmissionType::sync_rtr().is_sync_rtr());
		assert!(TransmissionType::async_rtr().is_async_rtr());
		assert!(TransmissionType::event_driven(false).is_event_driven());
		assert!(TransmissionType::event_driven(true).is_event_driven());
	}
}
