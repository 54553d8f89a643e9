//! Canonical byte encoding and decoding for every CiA-301 data type.
//!
//! All integers are little-endian, two's-complement for signed types. Bit-sized integers
//! (24/40/48/56) occupy `ceil(bits/8)` bytes on the wire and are sign-extended (or
//! zero-extended) on read to the next-wider native integer for in-memory storage.

use super::data_type::DataType;

/// A 48-bit CANopen timestamp: milliseconds after midnight and days since 1984-01-01.
///
/// Used by both TIME_OF_DAY and TIME_DIFFERENCE, which share this wire layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimeStamp48 {
	/// Milliseconds since midnight. Only the low 28 bits are meaningful.
	pub ms_since_midnight: u32,
	/// Days since 1984-01-01.
	pub days: u16,
}

impl TimeStamp48 {
	fn decode(bytes: &[u8; 6]) -> Self {
		let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
		let days = u16::from_le_bytes([bytes[4], bytes[5]]);
		Self { ms_since_midnight: raw & 0x0FFF_FFFF, days }
	}

	fn encode(self) -> [u8; 6] {
		let mut out = [0u8; 6];
		out[..4].copy_from_slice(&(self.ms_since_midnight & 0x0FFF_FFFF).to_le_bytes());
		out[4..].copy_from_slice(&self.days.to_le_bytes());
		out
	}
}

/// A decoded object dictionary value, tagged by the [`DataType`] it was decoded as.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	/// BOOLEAN.
	Boolean(bool),
	/// INTEGER8.
	Integer8(i8),
	/// INTEGER16.
	Integer16(i16),
	/// INTEGER24, sign-extended to i32.
	Integer24(i32),
	/// INTEGER32.
	Integer32(i32),
	/// INTEGER40, sign-extended to i64.
	Integer40(i64),
	/// INTEGER48, sign-extended to i64.
	Integer48(i64),
	/// INTEGER56, sign-extended to i64.
	Integer56(i64),
	/// INTEGER64.
	Integer64(i64),
	/// UNSIGNED8.
	Unsigned8(u8),
	/// UNSIGNED16.
	Unsigned16(u16),
	/// UNSIGNED24, widened to u32.
	Unsigned24(u32),
	/// UNSIGNED32.
	Unsigned32(u32),
	/// UNSIGNED40, widened to u64.
	Unsigned40(u64),
	/// UNSIGNED48, widened to u64.
	Unsigned48(u64),
	/// UNSIGNED56, widened to u64.
	Unsigned56(u64),
	/// UNSIGNED64.
	Unsigned64(u64),
	/// REAL32.
	Real32(f32),
	/// REAL64.
	Real64(f64),
	/// VISIBLE_STRING.
	VisibleString(String),
	/// OCTET_STRING.
	OctetString(Vec<u8>),
	/// UNICODE_STRING. Always carries a trailing 0 code unit in memory, stripped from the
	/// wire encoding.
	UnicodeString(Vec<u16>),
	/// TIME_OF_DAY.
	TimeOfDay(TimeStamp48),
	/// TIME_DIFFERENCE.
	TimeDifference(TimeStamp48),
	/// DOMAIN.
	Domain(Vec<u8>),
}

/// Error returned when a byte slice cannot be decoded as the requested [`DataType`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CodecError {
	/// The slice length did not match the fixed wire length of the requested type.
	#[error("{data_type:?} requires {expected} bytes, got {actual}")]
	WrongLength {
		/// The type that was being decoded.
		data_type: DataType,
		/// The length it requires.
		expected: usize,
		/// The length actually supplied.
		actual: usize,
	},

	/// A VISIBLE_STRING contained bytes outside printable ASCII/Latin-1 text semantics this
	/// codec is willing to round-trip (embedded NUL).
	#[error("VISIBLE_STRING must not contain an embedded NUL byte")]
	EmbeddedNul,

	/// An OCTET_STRING/UNICODE_STRING/DOMAIN-typed buffer had an odd number of bytes where
	/// whole 16-bit code units were required.
	#[error("UNICODE_STRING byte length {0} is not a multiple of 2")]
	UnalignedUnicodeString(usize),
}

impl Value {
	/// The [`DataType`] tag for this value.
	pub fn data_type(&self) -> DataType {
		match self {
			Value::Boolean(_) => DataType::Boolean,
			Value::Integer8(_) => DataType::Integer8,
			Value::Integer16(_) => DataType::Integer16,
			Value::Integer24(_) => DataType::Integer24,
			Value::Integer32(_) => DataType::Integer32,
			Value::Integer40(_) => DataType::Integer40,
			Value::Integer48(_) => DataType::Integer48,
			Value::Integer56(_) => DataType::Integer56,
			Value::Integer64(_) => DataType::Integer64,
			Value::Unsigned8(_) => DataType::Unsigned8,
			Value::Unsigned16(_) => DataType::Unsigned16,
			Value::Unsigned24(_) => DataType::Unsigned24,
			Value::Unsigned32(_) => DataType::Unsigned32,
			Value::Unsigned40(_) => DataType::Unsigned40,
			Value::Unsigned48(_) => DataType::Unsigned48,
			Value::Unsigned56(_) => DataType::Unsigned56,
			Value::Unsigned64(_) => DataType::Unsigned64,
			Value::Real32(_) => DataType::Real32,
			Value::Real64(_) => DataType::Real64,
			Value::VisibleString(_) => DataType::VisibleString,
			Value::OctetString(_) => DataType::OctetString,
			Value::UnicodeString(_) => DataType::UnicodeString,
			Value::TimeOfDay(_) => DataType::TimeOfDay,
			Value::TimeDifference(_) => DataType::TimeDifference,
			Value::Domain(_) => DataType::Domain,
		}
	}

	/// Encode this value into its canonical wire representation, appending to `out`.
	///
	/// Array types are written as a raw byte sequence without a length prefix; a length
	/// prefix, when one is needed (streaming through an SDO segment), is the caller's
	/// responsibility (it comes from the SDO initiate frame, not the codec).
	pub fn encode(&self, out: &mut Vec<u8>) {
		match self {
			Value::Boolean(v) => out.push(if *v { 1 } else { 0 }),
			Value::Integer8(v) => out.push(*v as u8),
			Value::Integer16(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Integer24(v) => out.extend_from_slice(&v.to_le_bytes()[..3]),
			Value::Integer32(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Integer40(v) => out.extend_from_slice(&v.to_le_bytes()[..5]),
			Value::Integer48(v) => out.extend_from_slice(&v.to_le_bytes()[..6]),
			Value::Integer56(v) => out.extend_from_slice(&v.to_le_bytes()[..7]),
			Value::Integer64(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Unsigned8(v) => out.push(*v),
			Value::Unsigned16(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Unsigned24(v) => out.extend_from_slice(&v.to_le_bytes()[..3]),
			Value::Unsigned32(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Unsigned40(v) => out.extend_from_slice(&v.to_le_bytes()[..5]),
			Value::Unsigned48(v) => out.extend_from_slice(&v.to_le_bytes()[..6]),
			Value::Unsigned56(v) => out.extend_from_slice(&v.to_le_bytes()[..7]),
			Value::Unsigned64(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Real32(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::Real64(v) => out.extend_from_slice(&v.to_le_bytes()),
			Value::VisibleString(v) => out.extend_from_slice(v.as_bytes()),
			Value::OctetString(v) => out.extend_from_slice(v),
			Value::UnicodeString(units) => {
				for unit in units.iter().take_while(|&&unit| unit != 0) {
					out.extend_from_slice(&unit.to_le_bytes());
				}
			}
			Value::TimeOfDay(v) => out.extend_from_slice(&v.encode()),
			Value::TimeDifference(v) => out.extend_from_slice(&v.encode()),
			Value::Domain(v) => out.extend_from_slice(v),
		}
	}

	/// Decode `bytes` as `data_type`.
	pub fn decode(data_type: DataType, bytes: &[u8]) -> Result<Self, CodecError> {
		if let Some(expected) = data_type.fixed_wire_len() {
			if bytes.len() != expected {
				return Err(CodecError::WrongLength { data_type, expected, actual: bytes.len() });
			}
		}

		Ok(match data_type {
			DataType::Boolean => Value::Boolean(bytes[0] != 0),
			DataType::Integer8 => Value::Integer8(bytes[0] as i8),
			DataType::Integer16 => Value::Integer16(i16::from_le_bytes([bytes[0], bytes[1]])),
			DataType::Integer24 => Value::Integer24(sign_extend_i32(bytes, 3)),
			DataType::Integer32 => Value::Integer32(i32::from_le_bytes(bytes.try_into().unwrap())),
			DataType::Integer40 => Value::Integer40(sign_extend_i64(bytes, 5)),
			DataType::Integer48 => Value::Integer48(sign_extend_i64(bytes, 6)),
			DataType::Integer56 => Value::Integer56(sign_extend_i64(bytes, 7)),
			DataType::Integer64 => Value::Integer64(i64::from_le_bytes(bytes.try_into().unwrap())),
			DataType::Unsigned8 => Value::Unsigned8(bytes[0]),
			DataType::Unsigned16 => Value::Unsigned16(u16::from_le_bytes([bytes[0], bytes[1]])),
			DataType::Unsigned24 => Value::Unsigned24(zero_extend_u32(bytes, 3)),
			DataType::Unsigned32 => Value::Unsigned32(u32::from_le_bytes(bytes.try_into().unwrap())),
			DataType::Unsigned40 => Value::Unsigned40(zero_extend_u64(bytes, 5)),
			DataType::Unsigned48 => Value::Unsigned48(zero_extend_u64(bytes, 6)),
			DataType::Unsigned56 => Value::Unsigned56(zero_extend_u64(bytes, 7)),
			DataType::Unsigned64 => Value::Unsigned64(u64::from_le_bytes(bytes.try_into().unwrap())),
			DataType::Real32 => Value::Real32(f32::from_le_bytes(bytes.try_into().unwrap())),
			DataType::Real64 => Value::Real64(f64::from_le_bytes(bytes.try_into().unwrap())),
			DataType::VisibleString => {
				if bytes.contains(&0) {
					return Err(CodecError::EmbeddedNul);
				}
				Value::VisibleString(bytes.iter().map(|&b| b as char).collect())
			}
			DataType::OctetString => Value::OctetString(bytes.to_vec()),
			DataType::UnicodeString => {
				if bytes.len() % 2 != 0 {
					return Err(CodecError::UnalignedUnicodeString(bytes.len()));
				}
				let mut units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
				units.push(0);
				Value::UnicodeString(units)
			}
			DataType::TimeOfDay => Value::TimeOfDay(TimeStamp48::decode(bytes.try_into().unwrap())),
			DataType::TimeDifference => Value::TimeDifference(TimeStamp48::decode(bytes.try_into().unwrap())),
			DataType::Domain => Value::Domain(bytes.to_vec()),
		})
	}
}

fn sign_extend_i32(bytes: &[u8], len: usize) -> i32 {
	let mut buf = [0u8; 4];
	buf[..len].copy_from_slice(&bytes[..len]);
	let shift = (4 - len) * 8;
	((u32::from_le_bytes(buf) << shift) as i32) >> shift
}

fn sign_extend_i64(bytes: &[u8], len: usize) -> i64 {
	let mut buf = [0u8; 8];
	buf[..len].copy_from_slice(&bytes[..len]);
	let shift = (8 - len) * 8;
	((u64::from_le_bytes(buf) << shift) as i64) >> shift
}

fn zero_extend_u32(bytes: &[u8], len: usize) -> u32 {
	let mut buf = [0u8; 4];
	buf[..len].copy_from_slice(&bytes[..len]);
	u32::from_le_bytes(buf)
}

fn zero_extend_u64(bytes: &[u8], len: usize) -> u64 {
	let mut buf = [0u8; 8];
	buf[..len].copy_from_slice(&bytes[..len]);
	u64::from_le_bytes(buf)
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};

	fn round_trip(value: Value) {
		let mut bytes = Vec::new();
		value.encode(&mut bytes);
		let decoded = Value::decode(value.data_type(), &bytes).unwrap();
		assert!(decoded == value);
	}

	#[test]
	fn round_trips_every_fixed_width_type() {
		round_trip(Value::Boolean(true));
		round_trip(Value::Integer8(-5));
		round_trip(Value::Integer16(-1000));
		round_trip(Value::Integer32(i32::MIN));
		round_trip(Value::Unsigned8(250));
		round_trip(Value::Unsigned16(60000));
		round_trip(Value::Unsigned32(u32::MAX));
		round_trip(Value::Real32(1.5));
		round_trip(Value::Real64(-2.25));
		round_trip(Value::Unsigned64(u64::MAX));
		round_trip(Value::Integer64(i64::MIN));
	}

	#[test]
	fn round_trips_bit_sized_integers_with_sign_extension() {
		round_trip(Value::Integer24(-1));
		round_trip(Value::Integer24(0x7FFFFF));
		round_trip(Value::Integer40(-123456));
		round_trip(Value::Unsigned24(0xABCDEF));
		round_trip(Value::Unsigned48(0xFFFF_FFFF_FFFF));
	}

	#[test]
	fn integer24_sign_extends_negative_values() {
		let bytes = [0xFFu8, 0xFF, 0xFF]; // -1 in 24-bit two's complement
		let_assert!(Ok(Value::Integer24(-1)) = Value::decode(DataType::Integer24, &bytes));
	}

	#[test]
	fn unsigned24_zero_extends() {
		let bytes = [0xFFu8, 0xFF, 0xFF];
		let_assert!(Ok(Value::Unsigned24(0xFFFFFF)) = Value::decode(DataType::Unsigned24, &bytes));
	}

	#[test]
	fn round_trips_visible_string() {
		round_trip(Value::VisibleString("lely-core".to_string()));
	}

	#[test]
	fn round_trips_octet_string_and_domain() {
		round_trip(Value::OctetString(vec![1, 2, 3, 4]));
		round_trip(Value::Domain(vec![0xDE, 0xAD, 0xBE, 0xEF]));
	}

	#[test]
	fn unicode_string_keeps_in_memory_null_terminator_but_not_on_wire() {
		let value = Value::UnicodeString(vec!['h' as u16, 'i' as u16, 0]);
		let mut bytes = Vec::new();
		value.encode(&mut bytes);
		assert!(bytes == [b'h' as u8, 0, b'i' as u8, 0]);
		let decoded = Value::decode(DataType::UnicodeString, &bytes).unwrap();
		assert!(decoded == value);
	}

	#[test]
	fn time_of_day_round_trips() {
		round_trip(Value::TimeOfDay(TimeStamp48 { ms_since_midnight: 12345, days: 14000 }));
	}

	#[test]
	fn wrong_length_is_rejected() {
		let_assert!(Err(CodecError::WrongLength { .. }) = Value::decode(DataType::Unsigned32, &[1, 2, 3]));
	}
}
