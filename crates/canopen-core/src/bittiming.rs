//! Fixed tables for the bit rates CiA-301 requires a node to support.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One of the eight bit rates a CANopen node may be asked to run at.
///
/// The discriminant matches the bit index used in the supported-bit-rates field of a
/// device's identity object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BitRate {
	/// 10 kbit/s.
	Kbit10 = 0,
	/// 20 kbit/s.
	Kbit20 = 1,
	/// 50 kbit/s.
	Kbit50 = 2,
	/// 125 kbit/s.
	Kbit125 = 3,
	/// 250 kbit/s.
	Kbit250 = 4,
	/// 500 kbit/s.
	Kbit500 = 5,
	/// 800 kbit/s.
	Kbit800 = 6,
	/// 1000 kbit/s.
	Kbit1000 = 7,
}

impl BitRate {
	/// All bit rates in ascending order, indexed by [`Self as u8`].
	pub const ALL: [BitRate; 8] = [
		BitRate::Kbit10,
		BitRate::Kbit20,
		BitRate::Kbit50,
		BitRate::Kbit125,
		BitRate::Kbit250,
		BitRate::Kbit500,
		BitRate::Kbit800,
		BitRate::Kbit1000,
	];

	/// The nominal bit rate in bits per second.
	pub const fn bits_per_second(self) -> u32 {
		match self {
			BitRate::Kbit10 => 10_000,
			BitRate::Kbit20 => 20_000,
			BitRate::Kbit50 => 50_000,
			BitRate::Kbit125 => 125_000,
			BitRate::Kbit250 => 250_000,
			BitRate::Kbit500 => 500_000,
			BitRate::Kbit800 => 800_000,
			BitRate::Kbit1000 => 1_000_000,
		}
	}

	/// The bit mask for this rate within a supported-bit-rates bitset.
	pub const fn mask(self) -> u16 {
		1u16 << (self as u8)
	}
}

/// A bitset of supported bit rates, as stored in a device's identity object.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SupportedBitRates(u16);

impl SupportedBitRates {
	/// An empty set: no bit rates supported.
	pub const fn empty() -> Self {
		Self(0)
	}

	/// Mark `rate` as supported.
	pub const fn with(mut self, rate: BitRate) -> Self {
		self.0 |= rate.mask();
		self
	}

	/// True if `rate` is marked as supported.
	pub const fn supports(self, rate: BitRate) -> bool {
		self.0 & rate.mask() != 0
	}

	/// The raw bitset value.
	pub const fn bits(self) -> u16 {
		self.0
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn bit_rate_discriminants_match_bit_index() {
		for (i, rate) in BitRate::ALL.into_iter().enumerate() {
			assert!(u8::from(rate) == i as u8);
		}
	}

	#[test]
	fn supported_set_tracks_membership() {
		let set = SupportedBitRates::empty().with(BitRate::Kbit125).with(BitRate::Kbit500);
		assert!(set.supports(BitRate::Kbit125));
		assert!(set.supports(BitRate::Kbit500));
		assert!(!set.supports(BitRate::Kbit1000));
	}

	#[test]
	fn known_bit_rate_values() {
		assert!(BitRate::Kbit125.bits_per_second() == 125_000);
		assert!(BitRate::Kbit1000.bits_per_second() == 1_000_000);
	}
}
