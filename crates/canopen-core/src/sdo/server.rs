//! The server side of one SDO connection: one state machine per concurrent transfer.

use crate::abort::AbortCode;
use crate::dict::{Device, Value};
use crate::frame::{Frame, FrameFlags};

use super::command::{
	make_command_byte, split_command_byte, BlockSubcommand, ClientCommandSpecifier, InitiateFlags, SegmentFlags,
	ServerCommandSpecifier,
};
use super::request::RequestBuffer;

/// Default block size (number of 7-byte sub-block frames per acknowledgement round) a server
/// offers when it has no reason to prefer a smaller one.
pub const DEFAULT_BLOCK_SIZE: u8 = 127;

#[derive(Clone, Debug)]
enum State {
	Idle,
	DownloadSegmented { idx: u16, subidx: u8, toggle: bool, buffer: RequestBuffer },
	UploadSegmented { toggle: bool, buffer: RequestBuffer, offset: usize },
	BlockDownloadSub { idx: u16, subidx: u8, crc_enabled: bool, blksize: u8, next_seq: u8, buffer: RequestBuffer },
	BlockUploadSub { crc_enabled: bool, blksize: u8, buffer: Vec<u8>, offset: usize, seq: u8 },
}

/// One server-side SDO connection, handling exactly one transfer at a time.
///
/// Built around the SDO-Rx/SDO-Tx COB-ID pair a server listens on; the caller owns frame
/// dispatch (matching the connection's COB-ID via the network core) and simply calls
/// [`Self::handle`] for every matching frame received.
pub struct ServerSdo {
	node_id: u8,
	state: State,
}

impl std::fmt::Debug for ServerSdo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerSdo").field("node_id", &self.node_id).field("state", &self.state).finish()
	}
}

/// The default SDO server→client (Tx) COB-ID for a node's first SDO connection.
pub fn default_tx_cob_id(node_id: u8) -> u32 {
	0x580 + node_id as u32
}

/// The default SDO client→server (Rx) COB-ID for a node's first SDO connection.
pub fn default_rx_cob_id(node_id: u8) -> u32 {
	0x600 + node_id as u32
}

impl ServerSdo {
	/// Create a server for `node_id`, idle until the first request arrives.
	pub fn new(node_id: u8) -> Self {
		Self { node_id, state: State::Idle }
	}

	fn response_frame(&self, data: [u8; 8]) -> Frame {
		Frame::new(default_tx_cob_id(self.node_id), FrameFlags::empty(), &data).expect("node-id keeps COB-ID in range")
	}

	fn abort_frame(&mut self, idx: u16, subidx: u8, code: AbortCode) -> Frame {
		self.state = State::Idle;
		let reason = u32::from(code).to_le_bytes();
		let index = idx.to_le_bytes();
		self.response_frame([
			make_command_byte(ServerCommandSpecifier::AbortTransfer.into(), 0),
			index[0],
			index[1],
			subidx,
			reason[0],
			reason[1],
			reason[2],
			reason[3],
		])
	}

	/// Process one frame addressed to this connection's Rx COB-ID, returning the response
	/// frame to send (an acknowledgement or an abort), if any.
	pub fn handle(&mut self, device: &mut Device, frame: &Frame) -> Option<Frame> {
		let data = frame.data();
		if data.len() != 8 {
			return None;
		}

		// Block-download sub-block frames carry a raw sequence number (bits 6:0) plus a
		// last-segment flag (bit 7) in byte 0, not a command specifier; routing them through
		// the generic specifier check below would misread some sequence numbers as an abort
		// (specifier 4) or drop them outright (specifier 7), so dispatch on state first.
		if matches!(self.state, State::BlockDownloadSub { .. }) {
			return self.handle_block_download_sub(device, data);
		}

		let (specifier, _) = split_command_byte(data[0]);
		let specifier = ClientCommandSpecifier::try_from(specifier).ok()?;

		if specifier == ClientCommandSpecifier::AbortTransfer {
			self.state = State::Idle;
			return None;
		}

		match std::mem::replace(&mut self.state, State::Idle) {
			State::Idle => self.handle_initiate(device, specifier, data),
			State::DownloadSegmented { idx, subidx, toggle, buffer } => {
				self.state = State::DownloadSegmented { idx, subidx, toggle, buffer };
				self.handle_download_segment(device, specifier, data)
			}
			State::UploadSegmented { toggle, buffer, offset } => {
				self.state = State::UploadSegmented { toggle, buffer, offset };
				self.handle_upload_segment(specifier, data)
			}
			State::BlockDownloadSub { .. } => unreachable!("handled above"),
			State::BlockUploadSub { crc_enabled, blksize, buffer, offset, seq } => {
				self.state = State::BlockUploadSub { crc_enabled, blksize, buffer, offset, seq };
				self.handle_block_upload_sub(specifier, data)
			}
		}
	}

	fn handle_initiate(&mut self, device: &mut Device, specifier: ClientCommandSpecifier, data: &[u8]) -> Option<Frame> {
		let idx = u16::from_le_bytes([data[1], data[2]]);
		let subidx = data[3];

		match specifier {
			ClientCommandSpecifier::InitiateDownload => self.handle_initiate_download(device, idx, subidx, data),
			ClientCommandSpecifier::InitiateUpload => self.handle_initiate_upload(device, idx, subidx),
			ClientCommandSpecifier::BlockDownload => self.handle_block_download_initiate(device, idx, subidx, data),
			ClientCommandSpecifier::BlockUpload => self.handle_block_upload_initiate(device, idx, subidx, data),
			_ => Some(self.abort_frame(idx, subidx, AbortCode::InvalidOrUnknownCommandSpecifier)),
		}
	}

	fn lookup<'d>(&mut self, device: &'d mut Device, idx: u16, subidx: u8) -> Result<&'d mut crate::dict::SubObject, Frame> {
		let object = match device.object_mut(idx) {
			Some(object) => object,
			None => return Err(self.abort_frame(idx, subidx, AbortCode::ObjectDoesNotExist)),
		};
		match object.sub_mut(subidx) {
			Some(sub) => Ok(sub),
			None => Err(self.abort_frame(idx, subidx, AbortCode::SubIndexDoesNotExist)),
		}
	}

	fn handle_initiate_download(&mut self, device: &mut Device, idx: u16, subidx: u8, data: &[u8]) -> Option<Frame> {
		let flags = InitiateFlags::from_command_byte(data[0]);
		let sub = match self.lookup(device, idx, subidx) {
			Ok(sub) => sub,
			Err(abort) => return Some(abort),
		};
		if !sub.access().writable() {
			return Some(self.abort_frame(idx, subidx, AbortCode::WriteToReadOnlyObject));
		}

		if flags.expedited {
			let len = 4 - flags.unused_bytes as usize;
			if let Err(code) = sub.download_indication(&data[4..4 + len]) {
				return Some(self.abort_frame(idx, subidx, code));
			}
			Some(self.response_frame([
				make_command_byte(ServerCommandSpecifier::InitiateDownload.into(), 0),
				idx.to_le_bytes()[0],
				idx.to_le_bytes()[1],
				subidx,
				0,
				0,
				0,
				0,
			]))
		} else {
			let mut buffer = RequestBuffer::new();
			if flags.size_indicated {
				buffer.set_announced_size(u32::from_le_bytes(data[4..8].try_into().unwrap()));
			}
			self.state = State::DownloadSegmented { idx, subidx, toggle: false, buffer };
			Some(self.response_frame([
				make_command_byte(ServerCommandSpecifier::InitiateDownload.into(), 0),
				idx.to_le_bytes()[0],
				idx.to_le_bytes()[1],
				subidx,
				0,
				0,
				0,
				0,
			]))
		}
	}

	fn handle_download_segment(&mut self, device: &mut Device, specifier: ClientCommandSpecifier, data: &[u8]) -> Option<Frame> {
		let (idx, subidx, expected_toggle, mut buffer) = match std::mem::replace(&mut self.state, State::Idle) {
			State::DownloadSegmented { idx, subidx, toggle, buffer } => (idx, subidx, toggle, buffer),
			_ => unreachable!(),
		};
		if specifier != ClientCommandSpecifier::SegmentDownload {
			return Some(self.abort_frame(idx, subidx, AbortCode::InvalidOrUnknownCommandSpecifier));
		}
		let flags = SegmentFlags::from_command_byte(data[0]);
		if flags.toggle != expected_toggle {
			return Some(self.abort_frame(idx, subidx, AbortCode::ToggleBitNotAlternated));
		}
		let len = 7 - flags.unused_bytes as usize;
		buffer.append(&data[1..1 + len]);

		if flags.last_segment {
			buffer.finalize();
			let sub = match self.lookup(device, idx, subidx) {
				Ok(sub) => sub,
				Err(abort) => return Some(abort),
			};
			if let Err(code) = sub.download_indication(buffer.bytes()) {
				return Some(self.abort_frame(idx, subidx, code));
			}
		} else {
			self.state = State::DownloadSegmented { idx, subidx, toggle: !expected_toggle, buffer };
		}

		Some(self.response_frame([
			make_command_byte(
				ServerCommandSpecifier::SegmentDownload.into(),
				SegmentFlags { toggle: expected_toggle, unused_bytes: 0, last_segment: false }.to_command_bits(),
			),
			0,
			0,
			0,
			0,
			0,
			0,
			0,
		]))
	}

	fn handle_initiate_upload(&mut self, device: &mut Device, idx: u16, subidx: u8) -> Option<Frame> {
		let sub = match self.lookup(device, idx, subidx) {
			Ok(sub) => sub,
			Err(abort) => return Some(abort),
		};
		if !sub.access().readable() {
			return Some(self.abort_frame(idx, subidx, AbortCode::ReadFromWriteOnlyObject));
		}
		let mut bytes = Vec::new();
		if let Err(code) = sub.upload_indication(&mut bytes) {
			return Some(self.abort_frame(idx, subidx, code));
		}

		if bytes.len() <= 4 {
			let mut payload = [0u8; 4];
			payload[..bytes.len()].copy_from_slice(&bytes);
			let flags = InitiateFlags { size_indicated: true, expedited: true, unused_bytes: (4 - bytes.len()) as u8 };
			Some(self.response_frame([
				make_command_byte(ServerCommandSpecifier::InitiateUpload.into(), flags.to_command_bits()),
				idx.to_le_bytes()[0],
				idx.to_le_bytes()[1],
				subidx,
				payload[0],
				payload[1],
				payload[2],
				payload[3],
			]))
		} else {
			let size = bytes.len() as u32;
			let mut buffer = RequestBuffer::new();
			buffer.append(&bytes);
			self.state = State::UploadSegmented { toggle: false, buffer, offset: 0 };
			let flags = InitiateFlags { size_indicated: true, expedited: false, unused_bytes: 0 };
			let size_bytes = size.to_le_bytes();
			Some(self.response_frame([
				make_command_byte(ServerCommandSpecifier::InitiateUpload.into(), flags.to_command_bits()),
				idx.to_le_bytes()[0],
				idx.to_le_bytes()[1],
				subidx,
				size_bytes[0],
				size_bytes[1],
				size_bytes[2],
				size_bytes[3],
			]))
		}
	}

	fn handle_upload_segment(&mut self, specifier: ClientCommandSpecifier, data: &[u8]) -> Option<Frame> {
		let (expected_toggle, buffer, offset) = match std::mem::replace(&mut self.state, State::Idle) {
			State::UploadSegmented { toggle, buffer, offset } => (toggle, buffer, offset),
			_ => unreachable!(),
		};
		if specifier != ClientCommandSpecifier::SegmentUpload {
			return None;
		}
		let flags = SegmentFlags::from_command_byte(data[0]);
		if flags.toggle != expected_toggle {
			return Some(self.abort_frame(0, 0, AbortCode::ToggleBitNotAlternated));
		}

		let remaining = &buffer.bytes()[offset..];
		let chunk_len = remaining.len().min(7);
		let last_segment = remaining.len() <= 7;
		let mut payload = [0u8; 7];
		payload[..chunk_len].copy_from_slice(&remaining[..chunk_len]);

		if !last_segment {
			self.state = State::UploadSegmented { toggle: !expected_toggle, buffer, offset: offset + chunk_len };
		}

		let response_flags = SegmentFlags {
			toggle: expected_toggle,
			unused_bytes: (7 - chunk_len) as u8,
			last_segment,
		};
		Some(self.response_frame([
			make_command_byte(ServerCommandSpecifier::SegmentUpload.into(), response_flags.to_command_bits()),
			payload[0],
			payload[1],
			payload[2],
			payload[3],
			payload[4],
			payload[5],
			payload[6],
		]))
	}

	fn handle_block_download_initiate(&mut self, device: &mut Device, idx: u16, subidx: u8, data: &[u8]) -> Option<Frame> {
		let flags = InitiateFlags::from_command_byte(data[0]);
		let crc_enabled = data[0] & 0b0000_0100 != 0;
		let sub = match self.lookup(device, idx, subidx) {
			Ok(sub) => sub,
			Err(abort) => return Some(abort),
		};
		if !sub.access().writable() {
			return Some(self.abort_frame(idx, subidx, AbortCode::WriteToReadOnlyObject));
		}

		let mut buffer = RequestBuffer::new();
		if flags.size_indicated {
			buffer.set_announced_size(u32::from_le_bytes(data[4..8].try_into().unwrap()));
		}
		self.state = State::BlockDownloadSub { idx, subidx, crc_enabled, blksize: DEFAULT_BLOCK_SIZE, next_seq: 1, buffer };

		let command = make_command_byte(
			ServerCommandSpecifier::BlockDownload.into(),
			(if crc_enabled { 0b100 } else { 0 }) | BlockSubcommand::Initiate.bits(),
		);
		Some(self.response_frame([command, idx.to_le_bytes()[0], idx.to_le_bytes()[1], subidx, DEFAULT_BLOCK_SIZE, 0, 0, 0]))
	}

	fn handle_block_download_sub(&mut self, device: &mut Device, data: &[u8]) -> Option<Frame> {
		let (idx, subidx, crc_enabled, blksize, next_seq, mut buffer) = match std::mem::replace(&mut self.state, State::Idle) {
			State::BlockDownloadSub { idx, subidx, crc_enabled, blksize, next_seq, buffer } => (idx, subidx, crc_enabled, blksize, next_seq, buffer),
			_ => unreachable!(),
		};

		let seq = data[0] & 0b0111_1111;
		// Set on the final data segment of the whole transfer, not merely of this sub-block;
		// the server acks immediately rather than waiting for `seq == blksize`. The trailing
		// byte count and CRC arrive later in the separate end-block command.
		let last_segment = data[0] & 0b1000_0000 != 0;

		if seq == next_seq {
			buffer.append(&data[1..8]);
			if last_segment || seq == blksize {
				self.state = State::BlockDownloadSub { idx, subidx, crc_enabled, blksize, next_seq: 1, buffer };
				return Some(self.response_frame([
					make_command_byte(ServerCommandSpecifier::BlockDownload.into(), BlockSubcommand::Response.bits()),
					seq,
					blksize,
					0,
					0,
					0,
					0,
					0,
				]));
			}
			self.state = State::BlockDownloadSub { idx, subidx, crc_enabled, blksize, next_seq: seq + 1, buffer };
			None
		} else if end_block_command(data[0]).is_some() {
			self.finish_block_download(device, idx, subidx, crc_enabled, buffer, data)
		} else {
			// Out of order: ask the client to retransmit starting from the last good frame.
			self.state = State::BlockDownloadSub { idx, subidx, crc_enabled, blksize, next_seq, buffer };
			Some(self.response_frame([
				make_command_byte(ServerCommandSpecifier::BlockDownload.into(), BlockSubcommand::Response.bits()),
				next_seq.wrapping_sub(1),
				blksize,
				0,
				0,
				0,
				0,
				0,
			]))
		}
	}

	fn finish_block_download(
		&mut self,
		device: &mut Device,
		idx: u16,
		subidx: u8,
		crc_enabled: bool,
		mut buffer: RequestBuffer,
		end_frame: &[u8],
	) -> Option<Frame> {
		let unused_bytes = ((end_frame[0] >> 2) & 0b111) as usize;
		let trim = buffer.len().saturating_sub(unused_bytes);
		let mut bytes = buffer.take();
		bytes.truncate(trim);

		if crc_enabled {
			let expected_crc = u16::from_le_bytes([end_frame[1], end_frame[2]]);
			let actual_crc = crate::crc::crc16(&bytes);
			if actual_crc != expected_crc {
				return Some(self.abort_frame(idx, subidx, AbortCode::CrcError));
			}
		}

		let sub = match self.lookup(device, idx, subidx) {
			Ok(sub) => sub,
			Err(abort) => return Some(abort),
		};
		if let Err(code) = sub.download_indication(&bytes) {
			return Some(self.abort_frame(idx, subidx, code));
		}

		Some(self.response_frame([
			make_command_byte(ServerCommandSpecifier::BlockDownload.into(), BlockSubcommand::End.bits()),
			0,
			0,
			0,
			0,
			0,
			0,
			0,
		]))
	}

	fn handle_block_upload_initiate(&mut self, device: &mut Device, idx: u16, subidx: u8, data: &[u8]) -> Option<Frame> {
		let crc_enabled = data[0] & 0b0000_0100 != 0;
		let requested_blksize = data[4].max(1);
		let sub = match self.lookup(device, idx, subidx) {
			Ok(sub) => sub,
			Err(abort) => return Some(abort),
		};
		if !sub.access().readable() {
			return Some(self.abort_frame(idx, subidx, AbortCode::ReadFromWriteOnlyObject));
		}
		let mut bytes = Vec::new();
		if let Err(code) = sub.upload_indication(&mut bytes) {
			return Some(self.abort_frame(idx, subidx, code));
		}

		let size = bytes.len() as u32;
		let blksize = requested_blksize.min(DEFAULT_BLOCK_SIZE);
		self.state = State::BlockUploadSub { crc_enabled, blksize, buffer: bytes, offset: 0, seq: 1 };

		let command = make_command_byte(
			ServerCommandSpecifier::BlockUpload.into(),
			(if crc_enabled { 0b100 } else { 0 }) | 0b10,
		);
		let size_bytes = size.to_le_bytes();
		Some(self.response_frame([command, idx.to_le_bytes()[0], idx.to_le_bytes()[1], subidx, size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]))
	}

	fn handle_block_upload_sub(&mut self, specifier: ClientCommandSpecifier, _data: &[u8]) -> Option<Frame> {
		// The client's start-upload and per-window ack subcommands don't themselves produce a
		// response; the server's outgoing data segments are drained via `next_block_frame`
		// instead, mirroring how a real transport would pull frames off an outgoing queue.
		if specifier != ClientCommandSpecifier::BlockUpload {
			return None;
		}
		None
	}

	/// Pull the next frame of an in-progress block upload, or the end-block frame once the
	/// payload is exhausted. Returns `None` once the transfer has completed or if no block
	/// upload is in progress.
	pub fn next_block_frame(&mut self) -> Option<Frame> {
		let (crc_enabled, blksize, buffer, offset, seq) = match std::mem::replace(&mut self.state, State::Idle) {
			State::BlockUploadSub { crc_enabled, blksize, buffer, offset, seq } => (crc_enabled, blksize, buffer, offset, seq),
			other => {
				self.state = other;
				return None;
			}
		};

		if offset >= buffer.len() {
			let unused = ((7 - buffer.len() % 7) % 7) as u8;
			let crc_bytes = crate::crc::crc16(&buffer).to_le_bytes();
			let command = make_command_byte(
				ServerCommandSpecifier::BlockUpload.into(),
				(unused << 2) | BlockSubcommand::End.bits(),
			);
			return Some(self.response_frame([
				command,
				if crc_enabled { crc_bytes[0] } else { 0 },
				if crc_enabled { crc_bytes[1] } else { 0 },
				0,
				0,
				0,
				0,
				0,
			]));
		}

		let remaining = &buffer[offset..];
		let chunk_len = remaining.len().min(7);
		let is_last_chunk = offset + chunk_len >= buffer.len();
		let mut payload = [0u8; 7];
		payload[..chunk_len].copy_from_slice(&remaining[..chunk_len]);

		let seq_byte = (seq & 0b0111_1111) | if is_last_chunk { 0b1000_0000 } else { 0 };
		let next_offset = offset + chunk_len;
		let next_seq = if seq >= blksize { 1 } else { seq + 1 };
		self.state = State::BlockUploadSub { crc_enabled, blksize, buffer, offset: next_offset, seq: next_seq };

		let mut out = [0u8; 8];
		out[0] = seq_byte;
		out[1..].copy_from_slice(&payload);
		Some(Frame::new(default_tx_cob_id(self.node_id), FrameFlags::empty(), &out).expect("node-id keeps COB-ID in range"))
	}
}

fn end_block_command(byte: u8) -> Option<BlockSubcommand> {
	let (specifier, bits) = split_command_byte(byte);
	if ClientCommandSpecifier::try_from(specifier).ok()? != ClientCommandSpecifier::BlockDownload {
		return None;
	}
	match BlockSubcommand::from_bits(bits)? {
		BlockSubcommand::End => Some(BlockSubcommand::End),
		_ => None,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::dict::{Access, Object, ObjectCode, SubObject};
	use assert2::{assert, let_assert};

	fn device_with_u32(idx: u16, access: Access, initial: u32) -> Device {
		Device::new(1, 0, 0, 0)
			.unwrap()
			.with_object(Object::new(idx, ObjectCode::Var).with_sub(SubObject::new(0, access, false, Value::Unsigned32(initial))))
			.unwrap()
	}

	#[test]
	fn expedited_download_writes_value_and_acks() {
		let mut device = device_with_u32(0x2000, Access::ReadWrite, 0);
		let mut server = ServerSdo::new(1);
		let request = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x23, 0x00, 0x20, 0x00, 0xEF, 0xBE, 0xAD, 0xDE]).unwrap();
		let response = server.handle(&mut device, &request).unwrap();
		assert!(response.data()[0] == 0x60);
		assert!(device.object(0x2000).unwrap().sub(0).unwrap().value() == &Value::Unsigned32(0xDEADBEEF));
	}

	#[test]
	fn read_back_matches_written_value() {
		let mut device = device_with_u32(0x2000, Access::ReadWrite, 0xDEADBEEF);
		let mut server = ServerSdo::new(1);
		let request = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x40, 0x00, 0x20, 0x00, 0, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &request).unwrap();
		assert!(response.data() == [0x43, 0x00, 0x20, 0x00, 0xEF, 0xBE, 0xAD, 0xDE]);
	}

	#[test]
	fn segmented_upload_streams_visible_string() {
		let mut device = Device::new(1, 0, 0, 0)
			.unwrap()
			.with_object(
				Object::new(0x1008, ObjectCode::Var)
					.with_sub(SubObject::new(0, Access::ReadOnly, false, Value::VisibleString("lely-core".into()))),
			)
			.unwrap();
		let mut server = ServerSdo::new(1);

		let initiate = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x40, 0x08, 0x10, 0x00, 0, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &initiate).unwrap();
		assert!(response.data() == [0x41, 0x08, 0x10, 0x00, 0x09, 0x00, 0x00, 0x00]);

		let seg0 = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x60, 0, 0, 0, 0, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &seg0).unwrap();
		assert!(response.data() == [0x00, b'l', b'e', b'l', b'y', b'-', b'c', b'o']);

		let seg1 = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x70, 0, 0, 0, 0, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &seg1).unwrap();
		// toggle=1, n=5 unused, last segment: (1<<4) | (5<<1) | 1 = 0x1B.
		assert!(response.data() == [0x1B, b'r', b'e', 0, 0, 0, 0, 0]);
	}

	#[test]
	fn object_not_found_aborts() {
		let mut device = Device::new(1, 0, 0, 0).unwrap();
		let mut server = ServerSdo::new(1);
		let request = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x40, 0x00, 0x20, 0x00, 0, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &request).unwrap();
		let_assert!([0x80, ..] = response.data());
		let code = u32::from_le_bytes(response.data()[4..8].try_into().unwrap());
		assert!(code == u32::from(AbortCode::ObjectDoesNotExist));
	}

	#[test]
	fn write_outside_limits_aborts_with_value_range_code() {
		let mut device = Device::new(1, 0, 0, 0)
			.unwrap()
			.with_object(
				Object::new(0x2001, ObjectCode::Var).with_sub(
					SubObject::new(0, Access::ReadWrite, false, Value::Unsigned32(0))
						.with_limits(Value::Unsigned32(0), Value::Unsigned32(10)),
				),
			)
			.unwrap();
		let mut server = ServerSdo::new(1);
		let request = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0x23, 0x01, 0x20, 0x00, 100, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &request).unwrap();
		let code = u32::from_le_bytes(response.data()[4..8].try_into().unwrap());
		assert!(code == u32::from(AbortCode::ObjectValueInvalid));
	}

	#[test]
	fn block_download_with_crc_writes_full_payload() {
		let mut device = Device::new(1, 0, 0, 0)
			.unwrap()
			.with_object(Object::new(0x2002, ObjectCode::Var).with_sub(SubObject::new(0, Access::ReadWrite, false, Value::Domain(Vec::new()))))
			.unwrap();
		let mut server = ServerSdo::new(1);

		let payload: Vec<u8> = (0..100).map(|i| (i % 256) as u8).collect();
		let size_bytes = (payload.len() as u32).to_le_bytes();
		let initiate = Frame::new(
			default_rx_cob_id(1),
			FrameFlags::empty(),
			&[0xC6, 0x02, 0x20, 0x00, size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]],
		)
		.unwrap();
		let response = server.handle(&mut device, &initiate).unwrap();
		assert!(response.data()[0] >> 5 == 5);

		for (i, chunk) in payload.chunks(7).enumerate() {
			let seq = (i + 1) as u8;
			let last = i == 14;
			let mut data = [0u8; 8];
			data[0] = seq | if last { 0x80 } else { 0 };
			data[1..1 + chunk.len()].copy_from_slice(chunk);
			let frame = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &data).unwrap();
			let response = server.handle(&mut device, &frame);
			if last {
				let_assert!(Some(_) = response);
			}
		}

		let crc = crate::crc::crc16(&payload);
		let crc_bytes = crc.to_le_bytes();
		let unused = (15 * 7 - payload.len()) as u8;
		let end = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0xC1 | (unused << 2), crc_bytes[0], crc_bytes[1], 0, 0, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &end).unwrap();
		assert!(response.data()[0] >> 5 == 5);

		let_assert!(Value::Domain(stored) = device.object(0x2002).unwrap().sub(0).unwrap().value());
		assert!(stored == &payload);
	}

	#[test]
	fn block_upload_end_frame_reports_true_unused_byte_count() {
		let payload: Vec<u8> = (0..100).map(|i| (i % 256) as u8).collect();
		let mut device = Device::new(1, 0, 0, 0)
			.unwrap()
			.with_object(Object::new(0x2003, ObjectCode::Var).with_sub(SubObject::new(0, Access::ReadOnly, false, Value::Domain(payload.clone()))))
			.unwrap();
		let mut server = ServerSdo::new(1);

		let initiate = Frame::new(default_rx_cob_id(1), FrameFlags::empty(), &[0xA4, 0x03, 0x20, 0x00, DEFAULT_BLOCK_SIZE, 0, 0, 0]).unwrap();
		let response = server.handle(&mut device, &initiate).unwrap();
		assert!(response.data()[0] >> 5 == 6);
		assert!(u32::from_le_bytes(response.data()[4..8].try_into().unwrap()) == 100);

		let mut collected = Vec::new();
		for i in 0..15 {
			let frame = server.next_block_frame().unwrap();
			let seq = frame.data()[0] & 0x7F;
			assert!(seq == (i + 1) as u8);
			let is_last = frame.data()[0] & 0x80 != 0;
			assert!(is_last == (i == 14));
			let chunk_len = if i == 14 { 2 } else { 7 };
			collected.extend_from_slice(&frame.data()[1..1 + chunk_len]);
		}
		assert!(collected == payload);

		let end = server.next_block_frame().unwrap();
		assert!(end.data()[0] >> 5 == 6);
		let unused = (end.data()[0] >> 2) & 0b111;
		assert!(unused == 5);
		let crc = u16::from_le_bytes([end.data()[1], end.data()[2]]);
		assert!(crc == crate::crc::crc16(&payload));

		assert!(server.next_block_frame().is_none());
	}
}
