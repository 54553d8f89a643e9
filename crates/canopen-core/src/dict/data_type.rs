//! The sixteen-bit type codes CiA-301 defines for object dictionary entries.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A CiA-301 data type code, as stored in a sub-object's type-id field.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum DataType {
	/// 0001h: one byte, 0 or 1.
	Boolean = 0x0001,
	/// 0002h: signed 8-bit integer.
	Integer8 = 0x0002,
	/// 0003h: signed 16-bit integer.
	Integer16 = 0x0003,
	/// 0004h: signed 32-bit integer.
	Integer32 = 0x0004,
	/// 0005h: unsigned 8-bit integer.
	Unsigned8 = 0x0005,
	/// 0006h: unsigned 16-bit integer.
	Unsigned16 = 0x0006,
	/// 0007h: unsigned 32-bit integer.
	Unsigned32 = 0x0007,
	/// 0008h: IEEE-754 single precision float.
	Real32 = 0x0008,
	/// 0009h: ISO-8859 text, not null-terminated on the wire.
	VisibleString = 0x0009,
	/// 000Ah: raw bytes.
	OctetString = 0x000A,
	/// 000Bh: UTF-16LE code units, not null-terminated on the wire.
	UnicodeString = 0x000B,
	/// 000Ch: 48-bit time of day (ms-after-midnight u28 + days-since-1984-01-01 u16).
	TimeOfDay = 0x000C,
	/// 000Dh: same 48-bit layout as [`Self::TimeOfDay`], interpreted as a duration.
	TimeDifference = 0x000D,
	/// 000Fh: opaque, application-defined byte blob.
	Domain = 0x000F,
	/// 0010h: signed 24-bit integer, stored sign-extended to i32.
	Integer24 = 0x0010,
	/// 0011h: IEEE-754 double precision float.
	Real64 = 0x0011,
	/// 0012h: signed 40-bit integer, stored sign-extended to i64.
	Integer40 = 0x0012,
	/// 0013h: signed 48-bit integer, stored sign-extended to i64.
	Integer48 = 0x0013,
	/// 0014h: signed 56-bit integer, stored sign-extended to i64.
	Integer56 = 0x0014,
	/// 0015h: signed 64-bit integer.
	Integer64 = 0x0015,
	/// 0016h: unsigned 24-bit integer, stored widened to u32.
	Unsigned24 = 0x0016,
	/// 0018h: unsigned 40-bit integer, stored widened to u64.
	Unsigned40 = 0x0018,
	/// 0019h: unsigned 48-bit integer, stored widened to u64.
	Unsigned48 = 0x0019,
	/// 001Ah: unsigned 56-bit integer, stored widened to u64.
	Unsigned56 = 0x001A,
	/// 001Bh: unsigned 64-bit integer.
	Unsigned64 = 0x001B,
}

impl DataType {
	/// The number of bytes this type occupies on the wire, or `None` for variable-length
	/// types (strings, octet strings, domains).
	pub const fn fixed_wire_len(self) -> Option<usize> {
		use DataType::*;
		match self {
			Boolean | Integer8 | Unsigned8 => Some(1),
			Integer16 | Unsigned16 => Some(2),
			Integer24 | Unsigned24 => Some(3),
			Integer32 | Unsigned32 | Real32 => Some(4),
			Integer40 | Unsigned40 => Some(5),
			Integer48 | Unsigned48 | TimeOfDay | TimeDifference => Some(6),
			Integer56 | Unsigned56 => Some(7),
			Integer64 | Unsigned64 | Real64 => Some(8),
			VisibleString | OctetString | UnicodeString | Domain => None,
		}
	}

	/// True if this type may only appear with a length known up front (from the SDO
	/// initiate frame) rather than being self-delimiting.
	pub const fn is_array(self) -> bool {
		self.fixed_wire_len().is_none()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn round_trips_through_primitive() {
		for (code, expected) in [
			(0x0001u16, DataType::Boolean),
			(0x0010, DataType::Integer24),
			(0x001B, DataType::Unsigned64),
		] {
			let_assert_eq(code, expected);
		}
	}

	fn let_assert_eq(code: u16, expected: DataType) {
		let parsed = DataType::try_from(code).unwrap();
		assert!(parsed == expected);
		assert!(u16::from(parsed) == code);
	}

	#[test]
	fn variable_length_types_have_no_fixed_length() {
		assert!(DataType::VisibleString.fixed_wire_len().is_none());
		assert!(DataType::Domain.is_array());
	}

	#[test]
	fn bit_sized_integers_round_to_next_byte() {
		assert!(DataType::Integer24.fixed_wire_len() == Some(3));
		assert!(DataType::Unsigned40.fixed_wire_len() == Some(5));
	}
}
