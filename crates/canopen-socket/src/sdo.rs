//! Convenience functions for running a single SDO transfer over a socket.
//!
//! These drive [`ClientSdo`] directly against the socket, independent of whatever receivers
//! are registered on the [`CanOpenSocket`]'s network core: a transfer started here owns the
//! client/server COB-ID pair for its own duration and does not interact with [`CanOpenSocket::run`].

use std::time::Duration;

use canopen_core::sdo::{default_response_cob_id, ClientSdo};

use crate::{to_core_frame, to_socket_frame, CanOpenSocket, Error};

/// Read the value of a single sub-object from `node_id` over SDO, expedited or segmented as
/// the server prefers.
pub async fn read_object(canopen: &CanOpenSocket, node_id: u8, idx: u16, subidx: u8, timeout: Duration) -> Result<Vec<u8>, Error> {
	let mut client = ClientSdo::new(node_id);
	let Some(frame) = client.upload(idx, subidx) else {
		unreachable!("a freshly constructed client starts its first request immediately")
	};
	drive(canopen, &mut client, frame, node_id, timeout).await
}

/// Write `bytes` to a single sub-object on `node_id` over SDO, expedited or segmented
/// depending on the payload length.
pub async fn write_object(canopen: &CanOpenSocket, node_id: u8, idx: u16, subidx: u8, bytes: Vec<u8>, timeout: Duration) -> Result<(), Error> {
	let mut client = ClientSdo::new(node_id);
	let Some(frame) = client.download(idx, subidx, bytes) else {
		unreachable!("a freshly constructed client starts its first request immediately")
	};
	drive(canopen, &mut client, frame, node_id, timeout).await?;
	Ok(())
}

async fn drive(canopen: &CanOpenSocket, client: &mut ClientSdo, first: canopen_core::frame::Frame, node_id: u8, timeout: Duration) -> Result<Vec<u8>, Error> {
	let response_cob_id = default_response_cob_id(node_id);
	let mut pending = first;
	loop {
		let socket_frame = to_socket_frame(&pending)?;
		canopen.socket().send(&socket_frame).await?;

		let socket_frame = tokio::time::timeout(timeout, recv_matching(canopen, response_cob_id))
			.await
			.map_err(|_| Error::Timeout)??;
		let frame = match to_core_frame(&socket_frame) {
			Ok(frame) => frame,
			Err(_) => continue,
		};

		let (confirm, next) = client.handle(&frame);
		if let Some(confirm) = confirm {
			return match confirm.abort {
				Some(code) => Err(Error::Aborted(code)),
				None => Ok(confirm.payload),
			};
		}
		pending = next.expect("a response that produced no confirm always produces the next frame to send");
	}
}

async fn recv_matching(canopen: &CanOpenSocket, cob_id: u32) -> Result<can_socket::CanFrame, Error> {
	loop {
		let frame = canopen.socket().recv().await?;
		if frame.id().as_u32() == cob_id {
			return Ok(frame);
		}
	}
}
