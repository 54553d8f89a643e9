//! SDO abort codes (CiA-301 §7.2.4.3.17), shared by the object dictionary's indication hooks
//! and the server/client SDO state machines.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A 32-bit SDO abort code.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum AbortCode {
	/// Toggle bit not alternated.
	ToggleBitNotAlternated = 0x0503_0000,

	/// SDO protocol timed out.
	ProtocolTimedOut = 0x0504_0000,

	/// Client/server command specifier not valid or unknown.
	InvalidOrUnknownCommandSpecifier = 0x0504_0001,

	/// Invalid block size (block mode only).
	InvalidBlockSize = 0x0504_0002,

	/// Invalid sequence number (block mode only).
	InvalidSequenceNumber = 0x0504_0003,

	/// CRC error (block mode only).
	CrcError = 0x0504_0004,

	/// Out of memory.
	OutOfMemory = 0x0504_0005,

	/// Unsupported access to an object.
	UnsupportedObjectAccess = 0x0601_0000,

	/// Attempt to read a write-only object.
	ReadFromWriteOnlyObject = 0x0601_0001,

	/// Attempt to write a read-only object.
	WriteToReadOnlyObject = 0x0601_0002,

	/// Object does not exist in the object dictionary.
	ObjectDoesNotExist = 0x0602_0000,

	/// Object cannot be mapped to a PDO.
	ObjectCanNotBeMapped = 0x0604_0041,

	/// The number and length of the objects to be mapped would exceed the PDO length.
	NumberAndLengthOfObjectsExceedPdoLength = 0x0604_0042,

	/// General parameter incompatibility.
	GeneralParameterError = 0x0604_0043,

	/// General internal incompatibility in the device.
	GeneralInternalError = 0x0604_0047,

	/// Access failed due to a hardware error.
	HardwareError = 0x0606_0000,

	/// Data type does not match: length of service parameter does not match.
	LengthMismatch = 0x0607_0010,

	/// Data type does not match: length of service parameter too high.
	LengthTooHigh = 0x0607_0012,

	/// Data type does not match: length of service parameter too low.
	LengthTooLow = 0x0607_0013,

	/// Sub-index does not exist.
	SubIndexDoesNotExist = 0x0609_0011,

	/// Invalid value for parameter (download only).
	ObjectValueInvalid = 0x0609_0030,

	/// Value of parameter written too high (download only).
	ObjectValueTooHigh = 0x0609_0031,

	/// Value of parameter written too low (download only).
	ObjectValueTooLow = 0x0609_0032,

	/// Maximum value is less than minimum value.
	MaximumBelowMinimum = 0x0609_0036,

	/// Resource not available: SDO connection.
	ResourceNotAvailable = 0x060A_0023,

	/// General error.
	GeneralError = 0x0800_0000,

	/// Data cannot be transferred or stored to the application.
	CanNotTransferData = 0x0800_0020,

	/// Data cannot be transferred or stored to the application because of local control.
	LocalControlError = 0x0800_0021,

	/// Data cannot be transferred or stored to the application because of the present
	/// device state.
	InvalidDeviceStateForTransfer = 0x0800_0022,

	/// Object dictionary dynamic generation failed, or no object dictionary is present.
	FailedToGenerateDynamicDictionary = 0x0800_0023,

	/// No data available.
	NoDataAvailable = 0x0800_0024,
}

impl std::fmt::Display for AbortCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{:08X} ({self:?})", u32::from(*self))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn known_codes_match_standard_values() {
		assert!(u32::from(AbortCode::ToggleBitNotAlternated) == 0x0503_0000);
		assert!(u32::from(AbortCode::SubIndexDoesNotExist) == 0x0609_0011);
		assert!(u32::from(AbortCode::ObjectValueInvalid) == 0x0609_0030);
		assert!(u32::from(AbortCode::LengthMismatch) == 0x0607_0010);
	}

	#[test]
	fn round_trips_through_primitive() {
		let code = AbortCode::try_from(0x0602_0000u32).unwrap();
		assert!(matches!(code, AbortCode::ObjectDoesNotExist));
	}
}
