//! Errors raised by the tokio binding.

use canopen_core::AbortCode;

/// An error raised while driving a CANopen exchange over a SocketCAN interface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The underlying socket operation failed.
	#[error("CAN socket I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// A frame received from the core could not be translated to a SocketCAN frame.
	#[error("invalid CAN identifier: {0}")]
	InvalidId(#[from] can_socket::error::InvalidId),

	/// No response arrived before the configured timeout.
	#[error("timed out waiting for a response")]
	Timeout,

	/// The server aborted the transfer.
	#[error("SDO transfer aborted: {0}")]
	Aborted(AbortCode),
}
