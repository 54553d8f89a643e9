//! SDO command-specifier byte layout (CiA-301 §7.2.4).
//!
//! Byte 0 of every SDO frame carries a 3-bit command specifier in bits 7:5, plus
//! direction-specific flag bits below it.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The command specifier a client places in bits 7:5 of an SDO request frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ClientCommandSpecifier {
	/// Continuation of a segmented download.
	SegmentDownload = 0,
	/// Start of an expedited or segmented download.
	InitiateDownload = 1,
	/// Start of an expedited or segmented upload.
	InitiateUpload = 2,
	/// Request for the next segment of an upload.
	SegmentUpload = 3,
	/// Abort the current transfer.
	AbortTransfer = 4,
	/// Block upload sub-commands (initiate / start / end).
	BlockUpload = 5,
	/// Block download sub-commands (initiate / sub-block / end).
	BlockDownload = 6,
}

/// The command specifier a server places in bits 7:5 of an SDO response frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ServerCommandSpecifier {
	/// Continuation of a segmented upload.
	SegmentUpload = 0,
	/// Acknowledgement of one download segment.
	SegmentDownload = 1,
	/// Acknowledgement of an initiate-upload request.
	InitiateUpload = 2,
	/// Acknowledgement of an initiate-download request.
	InitiateDownload = 3,
	/// Abort the current transfer.
	AbortTransfer = 4,
	/// Block download sub-commands (response / end response).
	BlockDownload = 5,
	/// Block upload sub-commands (response / end).
	BlockUpload = 6,
}

/// Sub-command carried in bits 1:0 of a block-transfer command byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockSubcommand {
	/// Initiate the block transfer.
	Initiate,
	/// End the block transfer.
	End,
	/// Acknowledge a received sub-block (download direction) or confirm start (upload).
	Response,
	/// Start the upload after the server's initiate response (upload direction only).
	StartUpload,
}

impl BlockSubcommand {
	pub(crate) fn from_bits(bits: u8) -> Option<Self> {
		match bits & 0b11 {
			0 => Some(Self::Initiate),
			1 => Some(Self::End),
			2 => Some(Self::Response),
			3 => Some(Self::StartUpload),
			_ => None,
		}
	}

	pub(crate) fn bits(self) -> u8 {
		match self {
			Self::Initiate => 0,
			Self::End => 1,
			Self::Response => 2,
			Self::StartUpload => 3,
		}
	}
}

/// The fields of an initiate-download or initiate-upload command byte, beyond the
/// command specifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InitiateFlags {
	/// `s`: the data-set size field is meaningful.
	pub size_indicated: bool,
	/// `e`: the payload fits directly in bytes 4..8 of this frame (expedited transfer).
	pub expedited: bool,
	/// `n`: number of bytes in 4..8 that do NOT carry data, valid only when `expedited`.
	pub unused_bytes: u8,
}

impl InitiateFlags {
	pub(crate) fn from_command_byte(byte: u8) -> Self {
		Self {
			size_indicated: byte & 0b0000_0001 != 0,
			expedited: byte & 0b0000_0010 != 0,
			unused_bytes: (byte >> 2) & 0b11,
		}
	}

	pub(crate) fn to_command_bits(self) -> u8 {
		let mut bits = 0u8;
		if self.size_indicated {
			bits |= 0b0000_0001;
		}
		if self.expedited {
			bits |= 0b0000_0010;
		}
		bits |= (self.unused_bytes & 0b11) << 2;
		bits
	}
}

/// The fields of a segment-download or segment-upload command byte, beyond the command
/// specifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SegmentFlags {
	/// `t`: alternates 0/1/0/1.. across successive segments.
	pub toggle: bool,
	/// `n`: number of unused bytes at the end of this segment's 7-byte payload.
	pub unused_bytes: u8,
	/// `c`: this is the final segment of the transfer.
	pub last_segment: bool,
}

impl SegmentFlags {
	pub(crate) fn from_command_byte(byte: u8) -> Self {
		Self {
			toggle: byte & 0b0001_0000 != 0,
			unused_bytes: (byte >> 1) & 0b111,
			last_segment: byte & 0b0000_0001 != 0,
		}
	}

	pub(crate) fn to_command_bits(self) -> u8 {
		let mut bits = 0u8;
		if self.toggle {
			bits |= 0b0001_0000;
		}
		bits |= (self.unused_bytes & 0b111) << 1;
		if self.last_segment {
			bits |= 0b0000_0001;
		}
		bits
	}
}

/// Split a command byte into its command specifier (bits 7:5) and the remaining five bits.
pub(crate) fn split_command_byte(byte: u8) -> (u8, u8) {
	(byte >> 5, byte & 0b0001_1111)
}

/// Compose a command byte from a command specifier and flag bits.
pub(crate) fn make_command_byte(specifier: u8, flags: u8) -> u8 {
	(specifier << 5) | (flags & 0b0001_1111)
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn initiate_flags_round_trip() {
		let flags = InitiateFlags { size_indicated: true, expedited: true, unused_bytes: 2 };
		let byte = make_command_byte(ClientCommandSpecifier::InitiateDownload.into(), flags.to_command_bits());
		let (specifier, bits) = split_command_byte(byte);
		assert!(ClientCommandSpecifier::try_from(specifier).unwrap() == ClientCommandSpecifier::InitiateDownload);
		assert!(InitiateFlags::from_command_byte(bits | (specifier << 5)) == flags);
	}

	#[test]
	fn segment_flags_round_trip() {
		let flags = SegmentFlags { toggle: true, unused_bytes: 5, last_segment: true };
		let bits = flags.to_command_bits();
		assert!(SegmentFlags::from_command_byte(bits) == flags);
	}

	#[test]
	fn block_subcommand_round_trips() {
		for sub in [BlockSubcommand::Initiate, BlockSubcommand::End, BlockSubcommand::Response, BlockSubcommand::StartUpload] {
			assert!(BlockSubcommand::from_bits(sub.bits()) == Some(sub));
		}
	}
}
