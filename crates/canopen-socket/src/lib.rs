//! Tokio binding wiring [`canopen_core`]'s sans-io protocol core to a Linux SocketCAN
//! interface.
//!
//! [`CanOpenSocket::run`] drives a [`NetworkCore`] from the real clock and a real
//! [`can_socket::tokio::CanSocket`]: frames read from the socket are fed into the core,
//! frames the core wants to send go out through the socket, and the core's timer wheel is
//! serviced by sleeping until its next expiry.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use can_socket::tokio::CanSocket;
use can_socket::CanId;
use canopen_core::frame::{Frame, FrameFlags, InvalidFrame};
use canopen_core::net::NetworkCore;
use canopen_core::timer::Timestamp;

pub mod error;
pub mod sdo;

pub use error::Error;

/// Convert a received SocketCAN frame into the core's frame representation.
pub fn to_core_frame(frame: &can_socket::CanFrame) -> Result<Frame, InvalidFrame> {
	let flags = FrameFlags::empty().with_ide(matches!(frame.id(), CanId::Extended(_))).with_rtr(frame.is_rtr());
	if frame.is_rtr() {
		Frame::new_rtr(frame.id().as_u32(), flags, frame.data_length_code().unwrap_or(0))
	} else {
		Frame::new(frame.id().as_u32(), flags, frame.data())
	}
}

/// Convert a core frame into a SocketCAN frame ready to send.
pub fn to_socket_frame(frame: &Frame) -> Result<can_socket::CanFrame, Error> {
	let id = CanId::new(frame.id())?;
	if frame.flags().rtr() {
		Ok(can_socket::CanFrame::new_rtr(id, frame.len())?)
	} else {
		Ok(can_socket::CanFrame::new(id, frame.data(), None)?)
	}
}

/// A [`NetworkCore`] wired to a real SocketCAN interface and the tokio clock.
///
/// The core's logical clock runs in milliseconds since this binding was constructed.
#[allow(missing_debug_implementations)]
pub struct CanOpenSocket {
	socket: Rc<CanSocket>,
	core: NetworkCore,
	epoch: Instant,
	next_timer: Rc<Cell<Option<Timestamp>>>,
}

impl CanOpenSocket {
	/// Wire a fresh [`NetworkCore`] to `socket`.
	pub fn new(socket: CanSocket) -> Self {
		let socket = Rc::new(socket);
		let mut core = NetworkCore::new();
		let next_timer: Rc<Cell<Option<Timestamp>>> = Rc::new(Cell::new(None));

		let send_socket = socket.clone();
		core.set_send_callback(Box::new(move |frame| {
			let frame = to_socket_frame(frame)
				.map_err(|error| canopen_core::net::SendError::Transport(Box::new(error)))?;
			send_socket.try_send(&frame).map_err(|error| canopen_core::net::SendError::Transport(Box::new(error)))
		}));

		let next_timer_clone = next_timer.clone();
		core.set_next_timer_callback(Box::new(move |expiry| next_timer_clone.set(expiry)));

		Self { socket, core, epoch: Instant::now(), next_timer }
	}

	/// The wired network core, for registering receivers and timers.
	pub fn core(&mut self) -> &mut NetworkCore {
		&mut self.core
	}

	/// The underlying CAN socket.
	pub fn socket(&self) -> &CanSocket {
		&self.socket
	}

	fn now(&self) -> Timestamp {
		self.epoch.elapsed().as_millis() as Timestamp
	}

	/// Run the core forever: receive frames from the socket and service timers, advancing
	/// the core's clock as real time passes.
	///
	/// Returns only on a socket I/O error.
	pub async fn run(&mut self) -> Result<(), Error> {
		loop {
			self.core.set_time(self.now()).ok();
			let deadline = self.next_timer.get().map(|expiry| tokio::time::Instant::from_std(self.epoch) + Duration::from_millis(expiry));

			tokio::select! {
				frame = self.socket.recv() => {
					let frame = frame?;
					if let Ok(frame) = to_core_frame(&frame) {
						self.core.recv(&frame);
					}
				}
				() = sleep_until(deadline) => {
					self.core.set_time(self.now()).ok();
				}
			}
		}
	}
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn standard_data_frame_round_trips_through_socket_representation() {
		let frame = Frame::new(0x123, FrameFlags::empty(), &[1, 2, 3, 4]).unwrap();
		let socket_frame = to_socket_frame(&frame).unwrap();
		assert!(socket_frame.id() == CanId::new_standard(0x123).unwrap());
		assert!(socket_frame.data() == &[1, 2, 3, 4]);

		let back = to_core_frame(&socket_frame).unwrap();
		assert!(back.id() == frame.id());
		assert!(back.data() == frame.data());
		assert!(!back.flags().ide());
		assert!(!back.flags().rtr());
	}

	#[test]
	fn extended_rtr_frame_round_trips_through_socket_representation() {
		let flags = FrameFlags::empty().with_ide(true);
		let frame = Frame::new_rtr(0x1FFF_FFFF, flags, 6).unwrap();
		let socket_frame = to_socket_frame(&frame).unwrap();
		assert!(socket_frame.is_rtr());

		let back = to_core_frame(&socket_frame).unwrap();
		assert!(back.flags().ide());
		assert!(back.flags().rtr());
		assert!(back.len() == 6);
	}
}
