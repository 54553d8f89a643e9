//! The client side of one SDO connection, with FIFO-queued requests.

use std::collections::VecDeque;

use crate::abort::AbortCode;
use crate::frame::{Frame, FrameFlags};

use super::command::{
	make_command_byte, split_command_byte, BlockSubcommand, ClientCommandSpecifier, InitiateFlags, SegmentFlags, ServerCommandSpecifier,
};
use super::request::RequestBuffer;

/// The default abort code a client reports when [`ClientSdo::abort`] is called without a more
/// specific reason.
pub const DEFAULT_CLIENT_ABORT: AbortCode = AbortCode::CanNotTransferData;

/// Block size (number of 7-byte sub-block frames per acknowledgement round) this client
/// proposes when starting a block transfer.
const DEFAULT_BLOCK_SIZE: u8 = 127;

/// The outcome of one completed client request, delivered to its confirm callback exactly
/// once: `(idx, subidx, abort code if the transfer failed, uploaded payload)`.
#[derive(Debug, Clone)]
pub struct Confirm {
	/// The object index the request addressed.
	pub idx: u16,
	/// The sub-index the request addressed.
	pub subidx: u8,
	/// `Some` if the transfer was aborted, `None` on success.
	pub abort: Option<AbortCode>,
	/// The bytes uploaded, empty for a download request.
	pub payload: Vec<u8>,
}

#[derive(Debug)]
enum Kind {
	Download(Vec<u8>),
	Upload,
	BlockDownload(Vec<u8>),
	BlockUpload,
}

#[derive(Debug)]
struct Request {
	idx: u16,
	subidx: u8,
	kind: Kind,
}

#[derive(Debug)]
enum State {
	Idle,
	AwaitingDownloadInitiate { idx: u16, subidx: u8 },
	AwaitingDownloadSegment { idx: u16, subidx: u8, toggle: bool, remaining: Vec<u8> },
	AwaitingUploadInitiate { idx: u16, subidx: u8 },
	AwaitingUploadSegment { idx: u16, subidx: u8, toggle: bool, buffer: RequestBuffer },
	AwaitingBlockDownloadInitiate { idx: u16, subidx: u8, bytes: Vec<u8> },
	BlockDownloadSub { idx: u16, subidx: u8, blksize: u8, buffer: Vec<u8>, offset: usize, seq: u8 },
	AwaitingBlockDownloadEnd { idx: u16, subidx: u8 },
	AwaitingBlockUploadInitiate { idx: u16, subidx: u8, crc_enabled: bool },
	BlockUploadSub { idx: u16, subidx: u8, crc_enabled: bool, blksize: u8, next_seq: u8, buffer: RequestBuffer },
}

/// One client-side SDO connection: drives at most one transfer at a time, queueing the rest.
#[derive(Debug)]
pub struct ClientSdo {
	node_id: u8,
	state: State,
	queue: VecDeque<Request>,
}

/// The default SDO client→server (Rx, from the server's perspective) COB-ID this client sends
/// requests on.
pub fn default_request_cob_id(node_id: u8) -> u32 {
	0x600 + node_id as u32
}

/// The default SDO server→client COB-ID this client listens for responses on.
pub fn default_response_cob_id(node_id: u8) -> u32 {
	0x580 + node_id as u32
}

impl ClientSdo {
	/// Create a client addressing the server at `node_id`.
	pub fn new(node_id: u8) -> Self {
		Self { node_id, state: State::Idle, queue: VecDeque::new() }
	}

	fn request_frame(&self, data: [u8; 8]) -> Frame {
		Frame::new(default_request_cob_id(self.node_id), FrameFlags::empty(), &data).expect("node-id keeps COB-ID in range")
	}

	/// Queue a download of `bytes` to `(idx, subidx)`. Starts immediately if idle, otherwise
	/// waits behind any in-flight or already-queued request (FIFO).
	///
	/// Returns the initiate frame to send if this request could start immediately.
	pub fn download(&mut self, idx: u16, subidx: u8, bytes: Vec<u8>) -> Option<Frame> {
		self.queue.push_back(Request { idx, subidx, kind: Kind::Download(bytes) });
		self.start_next_if_idle()
	}

	/// Queue an upload from `(idx, subidx)`.
	///
	/// Returns the initiate frame to send if this request could start immediately.
	pub fn upload(&mut self, idx: u16, subidx: u8) -> Option<Frame> {
		self.queue.push_back(Request { idx, subidx, kind: Kind::Upload });
		self.start_next_if_idle()
	}

	/// Queue a block download of `bytes` to `(idx, subidx)` with CRC-16 verification.
	/// Starts immediately if idle, otherwise waits behind any in-flight or queued request.
	///
	/// Returns the initiate frame to send if this request could start immediately. Once the
	/// server's initiate response arrives, drain the sub-block frames with repeated calls to
	/// [`Self::next_block_frame`].
	pub fn block_download(&mut self, idx: u16, subidx: u8, bytes: Vec<u8>) -> Option<Frame> {
		self.queue.push_back(Request { idx, subidx, kind: Kind::BlockDownload(bytes) });
		self.start_next_if_idle()
	}

	/// Queue a block upload from `(idx, subidx)` with CRC-16 verification.
	///
	/// Returns the initiate frame to send if this request could start immediately.
	pub fn block_upload(&mut self, idx: u16, subidx: u8) -> Option<Frame> {
		self.queue.push_back(Request { idx, subidx, kind: Kind::BlockUpload });
		self.start_next_if_idle()
	}

	/// Abort the in-flight transfer, if any, reporting `reason` to its confirm.
	///
	/// The next queued request, if any, is NOT started automatically; the caller should send
	/// the returned abort frame and then drive the queue forward as usual (e.g. on the next
	/// `handle` call finding `Idle`), matching real client code that waits for the bus to
	/// settle before issuing a new request.
	pub fn abort(&mut self, reason: AbortCode) -> Option<(Confirm, Frame)> {
		let (idx, subidx) = match &self.state {
			State::Idle => return None,
			State::AwaitingDownloadInitiate { idx, subidx }
			| State::AwaitingDownloadSegment { idx, subidx, .. }
			| State::AwaitingUploadInitiate { idx, subidx }
			| State::AwaitingUploadSegment { idx, subidx, .. }
			| State::AwaitingBlockDownloadInitiate { idx, subidx, .. }
			| State::BlockDownloadSub { idx, subidx, .. }
			| State::AwaitingBlockDownloadEnd { idx, subidx }
			| State::AwaitingBlockUploadInitiate { idx, subidx, .. }
			| State::BlockUploadSub { idx, subidx, .. } => (*idx, *subidx),
		};
		self.state = State::Idle;
		let reason_bytes = u32::from(reason).to_le_bytes();
		let index = idx.to_le_bytes();
		let frame = self.request_frame([
			make_command_byte(ClientCommandSpecifier::AbortTransfer.into(), 0),
			index[0],
			index[1],
			subidx,
			reason_bytes[0],
			reason_bytes[1],
			reason_bytes[2],
			reason_bytes[3],
		]);
		Some((Confirm { idx, subidx, abort: Some(reason), payload: Vec::new() }, frame))
	}

	fn start_next_if_idle(&mut self) -> Option<Frame> {
		if !matches!(self.state, State::Idle) {
			return None;
		}
		let request = self.queue.pop_front()?;
		let idx_bytes = request.idx.to_le_bytes();
		match request.kind {
			Kind::Download(bytes) => {
				if bytes.len() <= 4 {
					let flags = InitiateFlags { size_indicated: true, expedited: true, unused_bytes: (4 - bytes.len()) as u8 };
					let mut payload = [0u8; 4];
					payload[..bytes.len()].copy_from_slice(&bytes);
					self.state = State::AwaitingDownloadInitiate { idx: request.idx, subidx: request.subidx };
					Some(self.request_frame([
						make_command_byte(ClientCommandSpecifier::InitiateDownload.into(), flags.to_command_bits()),
						idx_bytes[0],
						idx_bytes[1],
						request.subidx,
						payload[0],
						payload[1],
						payload[2],
						payload[3],
					]))
				} else {
					self.state = State::AwaitingDownloadSegment {
						idx: request.idx,
						subidx: request.subidx,
						toggle: false,
						remaining: bytes.clone(),
					};
					let flags = InitiateFlags { size_indicated: true, expedited: false, unused_bytes: 0 };
					let size = (bytes.len() as u32).to_le_bytes();
					Some(self.request_frame([
						make_command_byte(ClientCommandSpecifier::InitiateDownload.into(), flags.to_command_bits()),
						idx_bytes[0],
						idx_bytes[1],
						request.subidx,
						size[0],
						size[1],
						size[2],
						size[3],
					]))
				}
			}
			Kind::Upload => {
				self.state = State::AwaitingUploadInitiate { idx: request.idx, subidx: request.subidx };
				Some(self.request_frame([
					make_command_byte(ClientCommandSpecifier::InitiateUpload.into(), 0),
					idx_bytes[0],
					idx_bytes[1],
					request.subidx,
					0,
					0,
					0,
					0,
				]))
			}
			Kind::BlockDownload(bytes) => {
				let size = (bytes.len() as u32).to_le_bytes();
				self.state = State::AwaitingBlockDownloadInitiate { idx: request.idx, subidx: request.subidx, bytes };
				Some(self.request_frame([
					make_command_byte(ClientCommandSpecifier::BlockDownload.into(), 0b0000_0101),
					idx_bytes[0],
					idx_bytes[1],
					request.subidx,
					size[0],
					size[1],
					size[2],
					size[3],
				]))
			}
			Kind::BlockUpload => {
				self.state = State::AwaitingBlockUploadInitiate { idx: request.idx, subidx: request.subidx, crc_enabled: true };
				Some(self.request_frame([
					make_command_byte(ClientCommandSpecifier::BlockUpload.into(), 0b0000_0100 | BlockSubcommand::Initiate.bits()),
					idx_bytes[0],
					idx_bytes[1],
					request.subidx,
					DEFAULT_BLOCK_SIZE,
					0,
					0,
					0,
				]))
			}
		}
	}

	/// Process one response frame from the server, returning the confirm (if the transfer
	/// just completed or aborted) and the next frame to send (either the next step of this
	/// transfer, or the initiate frame of the next queued request).
	pub fn handle(&mut self, frame: &Frame) -> (Option<Confirm>, Option<Frame>) {
		let data = frame.data();
		if data.len() != 8 {
			return (None, None);
		}

		// Block-upload sub-block frames carry a raw sequence number (bits 6:0) plus a
		// last-segment flag (bit 7) in byte 0, not a command specifier; routing them through
		// the generic specifier check below would misread some sequence numbers as an abort
		// (specifier 4) or drop them outright (specifier 7), so dispatch on state first.
		if matches!(self.state, State::BlockUploadSub { .. }) {
			return self.on_block_upload_data(data);
		}

		let (specifier, _) = split_command_byte(data[0]);
		let Ok(specifier) = ServerCommandSpecifier::try_from(specifier) else {
			return (None, None);
		};

		if specifier == ServerCommandSpecifier::AbortTransfer {
			let (idx, subidx) = self.current_request_target();
			self.state = State::Idle;
			let reason = u32::from_le_bytes(data[4..8].try_into().unwrap());
			let abort = AbortCode::try_from(reason).ok();
			let confirm = Confirm { idx, subidx, abort: Some(abort.unwrap_or(AbortCode::GeneralError)), payload: Vec::new() };
			let next = self.start_next_if_idle();
			return (Some(confirm), next);
		}

		match std::mem::replace(&mut self.state, State::Idle) {
			State::Idle => (None, None),
			State::AwaitingDownloadInitiate { idx, subidx } => self.on_download_initiate_response(idx, subidx, specifier),
			State::AwaitingDownloadSegment { idx, subidx, toggle, remaining } => {
				self.on_download_segment_response(idx, subidx, toggle, remaining, specifier)
			}
			State::AwaitingUploadInitiate { idx, subidx } => self.on_upload_initiate_response(idx, subidx, specifier, data),
			State::AwaitingUploadSegment { idx, subidx, toggle, buffer } => {
				self.on_upload_segment_response(idx, subidx, toggle, buffer, specifier, data)
			}
			State::AwaitingBlockDownloadInitiate { idx, subidx, bytes } => self.on_block_download_initiate_response(idx, subidx, bytes, specifier, data),
			State::BlockDownloadSub { idx, subidx, blksize, buffer, offset, .. } => {
				self.on_block_download_ack(idx, subidx, blksize, buffer, offset, specifier, data)
			}
			State::AwaitingBlockDownloadEnd { idx, subidx } => self.on_block_download_end_response(idx, subidx, specifier),
			State::AwaitingBlockUploadInitiate { idx, subidx, crc_enabled } => {
				self.on_block_upload_initiate_response(idx, subidx, crc_enabled, specifier, data)
			}
			State::BlockUploadSub { .. } => unreachable!("handled above"),
		}
	}

	fn current_request_target(&self) -> (u16, u8) {
		match &self.state {
			State::Idle => (0, 0),
			State::AwaitingDownloadInitiate { idx, subidx }
			| State::AwaitingDownloadSegment { idx, subidx, .. }
			| State::AwaitingUploadInitiate { idx, subidx }
			| State::AwaitingUploadSegment { idx, subidx, .. }
			| State::AwaitingBlockDownloadInitiate { idx, subidx, .. }
			| State::BlockDownloadSub { idx, subidx, .. }
			| State::AwaitingBlockDownloadEnd { idx, subidx }
			| State::AwaitingBlockUploadInitiate { idx, subidx, .. }
			| State::BlockUploadSub { idx, subidx, .. } => (*idx, *subidx),
		}
	}

	fn on_download_initiate_response(&mut self, idx: u16, subidx: u8, specifier: ServerCommandSpecifier) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::InitiateDownload {
			return (None, None);
		}
		let confirm = Confirm { idx, subidx, abort: None, payload: Vec::new() };
		let next = self.start_next_if_idle();
		(Some(confirm), next)
	}

	fn on_download_segment_response(
		&mut self,
		idx: u16,
		subidx: u8,
		toggle: bool,
		mut remaining: Vec<u8>,
		specifier: ServerCommandSpecifier,
	) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::SegmentDownload {
			return (None, None);
		}
		let sent_len = remaining.len().min(7);
		let sent: Vec<u8> = remaining.drain(..sent_len).collect();
		let last_segment = remaining.is_empty();

		if !last_segment {
			self.state = State::AwaitingDownloadSegment { idx, subidx, toggle: !toggle, remaining };
			let flags = SegmentFlags { toggle: !toggle, unused_bytes: 0, last_segment: false };
			let mut payload = [0u8; 7];
			payload[..sent.len()].copy_from_slice(&sent);
			let frame = self.request_frame([
				make_command_byte(ClientCommandSpecifier::SegmentDownload.into(), flags.to_command_bits()),
				payload[0],
				payload[1],
				payload[2],
				payload[3],
				payload[4],
				payload[5],
				payload[6],
			]);
			(None, Some(frame))
		} else {
			let confirm = Confirm { idx, subidx, abort: None, payload: Vec::new() };
			let next = self.start_next_if_idle();
			(Some(confirm), next)
		}
	}

	fn on_upload_initiate_response(&mut self, idx: u16, subidx: u8, specifier: ServerCommandSpecifier, data: &[u8]) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::InitiateUpload {
			return (None, None);
		}
		let flags = InitiateFlags::from_command_byte(data[0]);
		if flags.expedited {
			let len = 4 - flags.unused_bytes as usize;
			let confirm = Confirm { idx, subidx, abort: None, payload: data[4..4 + len].to_vec() };
			let next = self.start_next_if_idle();
			(Some(confirm), next)
		} else {
			self.state = State::AwaitingUploadSegment { idx, subidx, toggle: false, buffer: RequestBuffer::new() };
			let flags = SegmentFlags { toggle: false, unused_bytes: 0, last_segment: false };
			let frame = self.request_frame([
				make_command_byte(ClientCommandSpecifier::SegmentUpload.into(), flags.to_command_bits()),
				0,
				0,
				0,
				0,
				0,
				0,
				0,
			]);
			(None, Some(frame))
		}
	}

	fn on_upload_segment_response(
		&mut self,
		idx: u16,
		subidx: u8,
		expected_toggle: bool,
		mut buffer: RequestBuffer,
		specifier: ServerCommandSpecifier,
		data: &[u8],
	) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::SegmentUpload {
			return (None, None);
		}
		let flags = SegmentFlags::from_command_byte(data[0]);
		if flags.toggle != expected_toggle {
			self.state = State::Idle;
			return (Some(Confirm { idx, subidx, abort: Some(AbortCode::ToggleBitNotAlternated), payload: Vec::new() }), self.start_next_if_idle());
		}
		let len = 7 - flags.unused_bytes as usize;
		buffer.append(&data[1..1 + len]);

		if flags.last_segment {
			buffer.finalize();
			let confirm = Confirm { idx, subidx, abort: None, payload: buffer.take() };
			let next = self.start_next_if_idle();
			(Some(confirm), next)
		} else {
			self.state = State::AwaitingUploadSegment { idx, subidx, toggle: !expected_toggle, buffer };
			let flags = SegmentFlags { toggle: !expected_toggle, unused_bytes: 0, last_segment: false };
			let frame = self.request_frame([
				make_command_byte(ClientCommandSpecifier::SegmentUpload.into(), flags.to_command_bits()),
				0,
				0,
				0,
				0,
				0,
				0,
				0,
			]);
			(None, Some(frame))
		}
	}

	fn on_block_download_initiate_response(
		&mut self,
		idx: u16,
		subidx: u8,
		bytes: Vec<u8>,
		specifier: ServerCommandSpecifier,
		data: &[u8],
	) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::BlockDownload {
			return (None, None);
		}
		let blksize = data[4].max(1);
		self.state = State::BlockDownloadSub { idx, subidx, blksize, buffer: bytes, offset: 0, seq: 1 };
		(None, self.next_block_frame())
	}

	fn on_block_download_ack(
		&mut self,
		idx: u16,
		subidx: u8,
		_blksize: u8,
		buffer: Vec<u8>,
		offset: usize,
		specifier: ServerCommandSpecifier,
		data: &[u8],
	) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::BlockDownload {
			return (None, None);
		}

		if offset >= buffer.len() {
			let unused = ((7 - buffer.len() % 7) % 7) as u8;
			let crc_bytes = crate::crc::crc16(&buffer).to_le_bytes();
			self.state = State::AwaitingBlockDownloadEnd { idx, subidx };
			let command = make_command_byte(ClientCommandSpecifier::BlockDownload.into(), (unused << 2) | BlockSubcommand::End.bits());
			return (None, Some(self.request_frame([command, crc_bytes[0], crc_bytes[1], 0, 0, 0, 0, 0])));
		}

		let blksize = data[2].max(1);
		self.state = State::BlockDownloadSub { idx, subidx, blksize, buffer, offset, seq: 1 };
		(None, self.next_block_frame())
	}

	fn on_block_download_end_response(&mut self, idx: u16, subidx: u8, specifier: ServerCommandSpecifier) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::BlockDownload {
			return (None, None);
		}
		let confirm = Confirm { idx, subidx, abort: None, payload: Vec::new() };
		let next = self.start_next_if_idle();
		(Some(confirm), next)
	}

	/// Pull the next frame of an in-progress block download, or `None` once the current
	/// window has been fully sent (awaiting the server's acknowledgement) or no block
	/// download is in progress.
	pub fn next_block_frame(&mut self) -> Option<Frame> {
		let (idx, subidx, blksize, buffer, offset, seq) = match std::mem::replace(&mut self.state, State::Idle) {
			State::BlockDownloadSub { idx, subidx, blksize, buffer, offset, seq } => (idx, subidx, blksize, buffer, offset, seq),
			other => {
				self.state = other;
				return None;
			}
		};

		if offset >= buffer.len() || seq > blksize {
			self.state = State::BlockDownloadSub { idx, subidx, blksize, buffer, offset, seq };
			return None;
		}

		let remaining = &buffer[offset..];
		let chunk_len = remaining.len().min(7);
		let is_last_chunk = offset + chunk_len >= buffer.len();
		let mut payload = [0u8; 7];
		payload[..chunk_len].copy_from_slice(&remaining[..chunk_len]);

		let seq_byte = seq | if is_last_chunk { 0b1000_0000 } else { 0 };
		let next_offset = offset + chunk_len;
		self.state = State::BlockDownloadSub { idx, subidx, blksize, buffer, offset: next_offset, seq: seq + 1 };

		let mut out = [0u8; 8];
		out[0] = seq_byte;
		out[1..].copy_from_slice(&payload);
		Some(self.request_frame(out))
	}

	fn on_block_upload_initiate_response(
		&mut self,
		idx: u16,
		subidx: u8,
		crc_enabled: bool,
		specifier: ServerCommandSpecifier,
		data: &[u8],
	) -> (Option<Confirm>, Option<Frame>) {
		if specifier != ServerCommandSpecifier::BlockUpload {
			return (None, None);
		}
		let size = u32::from_le_bytes(data[4..8].try_into().unwrap());
		let mut buffer = RequestBuffer::new();
		buffer.set_announced_size(size);
		self.state = State::BlockUploadSub { idx, subidx, crc_enabled, blksize: DEFAULT_BLOCK_SIZE, next_seq: 1, buffer };
		let command = make_command_byte(ClientCommandSpecifier::BlockUpload.into(), BlockSubcommand::StartUpload.bits());
		(None, Some(self.request_frame([command, 0, 0, 0, 0, 0, 0, 0])))
	}

	fn on_block_upload_data(&mut self, data: &[u8]) -> (Option<Confirm>, Option<Frame>) {
		let (idx, subidx, crc_enabled, blksize, next_seq, mut buffer) = match std::mem::replace(&mut self.state, State::Idle) {
			State::BlockUploadSub { idx, subidx, crc_enabled, blksize, next_seq, buffer } => (idx, subidx, crc_enabled, blksize, next_seq, buffer),
			_ => unreachable!(),
		};

		let seq = data[0] & 0b0111_1111;
		// Set on the final data segment of the whole transfer, not merely of this sub-block;
		// the end-of-block command with the trailing byte count and CRC arrives separately.
		let last_segment = data[0] & 0b1000_0000 != 0;

		if seq == next_seq {
			buffer.append(&data[1..8]);
			if last_segment || seq == blksize {
				self.state = State::BlockUploadSub { idx, subidx, crc_enabled, blksize, next_seq: 1, buffer };
				let frame = self.request_frame([
					make_command_byte(ClientCommandSpecifier::BlockUpload.into(), BlockSubcommand::Response.bits()),
					seq,
					blksize,
					0,
					0,
					0,
					0,
					0,
				]);
				return (None, Some(frame));
			}
			self.state = State::BlockUploadSub { idx, subidx, crc_enabled, blksize, next_seq: seq + 1, buffer };
			(None, None)
		} else if end_block_upload_command(data[0]).is_some() {
			self.finish_block_upload(idx, subidx, crc_enabled, buffer, data)
		} else {
			// Out of order: ask the server to retransmit starting from the last good frame.
			self.state = State::BlockUploadSub { idx, subidx, crc_enabled, blksize, next_seq, buffer };
			let frame = self.request_frame([
				make_command_byte(ClientCommandSpecifier::BlockUpload.into(), BlockSubcommand::Response.bits()),
				next_seq.wrapping_sub(1),
				blksize,
				0,
				0,
				0,
				0,
				0,
			]);
			(None, Some(frame))
		}
	}

	/// Verify the assembled payload against `end_frame`'s CRC and trailing unused-byte count,
	/// then acknowledge the end-of-block frame.
	///
	/// Like [`Self::abort`], this does NOT start the next queued request automatically — the
	/// caller should send the returned end-block acknowledgement first.
	fn finish_block_upload(
		&mut self,
		idx: u16,
		subidx: u8,
		crc_enabled: bool,
		mut buffer: RequestBuffer,
		end_frame: &[u8],
	) -> (Option<Confirm>, Option<Frame>) {
		let unused_bytes = ((end_frame[0] >> 2) & 0b111) as usize;
		let trim = buffer.len().saturating_sub(unused_bytes);
		buffer.finalize();
		let mut bytes = buffer.take();
		bytes.truncate(trim);

		self.state = State::Idle;

		if crc_enabled {
			let expected_crc = u16::from_le_bytes([end_frame[1], end_frame[2]]);
			if crate::crc::crc16(&bytes) != expected_crc {
				return (Some(Confirm { idx, subidx, abort: Some(AbortCode::CrcError), payload: Vec::new() }), None);
			}
		}

		let command = make_command_byte(ClientCommandSpecifier::BlockUpload.into(), BlockSubcommand::End.bits());
		let ack = self.request_frame([command, 0, 0, 0, 0, 0, 0, 0]);
		(Some(Confirm { idx, subidx, abort: None, payload: bytes }), Some(ack))
	}
}

fn end_block_upload_command(byte: u8) -> Option<BlockSubcommand> {
	let (specifier, bits) = split_command_byte(byte);
	if ServerCommandSpecifier::try_from(specifier).ok()? != ServerCommandSpecifier::BlockUpload {
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
	use assert2::assert;

	fn response(server_node: u8, payload: [u8; 8]) -> Frame {
		Frame::new(default_response_cob_id(server_node), FrameFlags::empty(), &payload).unwrap()
	}

	#[test]
	fn expedited_download_round_trip() {
		let mut client = ClientSdo::new(1);
		let request = client.download(0x2000, 0, vec![0xEF, 0xBE, 0xAD, 0xDE]).unwrap();
		assert!(request.data()[0] >> 5 == 1);
		let (confirm, next) = client.handle(&response(1, [0x60, 0x00, 0x20, 0x00, 0, 0, 0, 0]));
		assert!(confirm.unwrap().abort.is_none());
		assert!(next.is_none());
	}

	#[test]
	fn second_request_queues_behind_first() {
		let mut client = ClientSdo::new(1);
		let first = client.download(0x2000, 0, vec![1, 2, 3, 4]);
		assert!(first.is_some());
		let second = client.upload(0x2001, 0);
		assert!(second.is_none());

		let (_, next) = client.handle(&response(1, [0x60, 0x00, 0x20, 0x00, 0, 0, 0, 0]));
		let next = next.unwrap();
		assert!(next.data()[0] >> 5 == 2);
		assert!(u16::from_le_bytes([next.data()[1], next.data()[2]]) == 0x2001);
	}

	#[test]
	fn abort_reports_confirm_with_reason() {
		let mut client = ClientSdo::new(1);
		client.download(0x2000, 0, vec![1, 2, 3, 4]);
		let (confirm, frame) = client.abort(AbortCode::LocalControlError).unwrap();
		assert!(confirm.abort == Some(AbortCode::LocalControlError));
		assert!(frame.data()[0] >> 5 == 4);
	}

	#[test]
	fn segmented_upload_assembles_full_payload() {
		let mut client = ClientSdo::new(1);
		client.upload(0x1008, 0);
		let (_, next) = client.handle(&response(1, [0x41, 0x08, 0x10, 0x00, 0x09, 0x00, 0x00, 0x00]));
		assert!(next.is_some());
		let (_, next) = client.handle(&response(1, [0x00, b'l', b'e', b'l', b'y', b'-', b'c', b'o']));
		assert!(next.is_some());
		let (confirm, next) = client.handle(&response(1, [0x1B, b'r', b'e', 0, 0, 0, 0, 0]));
		assert!(next.is_none());
		assert!(confirm.unwrap().payload == b"lely-core");
	}

	#[test]
	fn block_download_round_trip_with_crc() {
		let mut client = ClientSdo::new(1);
		let payload: Vec<u8> = (0..100).map(|i| (i % 256) as u8).collect();
		let initiate = client.block_download(0x2003, 0, payload.clone()).unwrap();
		assert!(initiate.data()[0] >> 5 == 6);
		assert!(u32::from_le_bytes(initiate.data()[4..8].try_into().unwrap()) == 100);

		let (confirm, next) = client.handle(&response(1, [0xA4, 0x03, 0x20, 0x00, 127, 0, 0, 0]));
		assert!(confirm.is_none());
		let mut frame = next.unwrap();

		let mut collected = Vec::new();
		let mut last_seq = 0u8;
		loop {
			last_seq = frame.data()[0] & 0x7F;
			let is_last = frame.data()[0] & 0x80 != 0;
			collected.extend_from_slice(&frame.data()[1..8]);
			if is_last {
				break;
			}
			frame = client.next_block_frame().unwrap();
		}
		assert!(client.next_block_frame().is_none());
		assert!(collected[..100] == payload[..]);
		assert!(last_seq == 15);

		let (confirm, next) = client.handle(&response(1, [0xA2, last_seq, 127, 0, 0, 0, 0, 0]));
		assert!(confirm.is_none());
		let end = next.unwrap();
		assert!(end.data()[0] >> 5 == 6);
		let unused = (end.data()[0] >> 2) & 0b111;
		assert!(unused == 5);
		let crc = u16::from_le_bytes([end.data()[1], end.data()[2]]);
		assert!(crc == crate::crc::crc16(&payload));

		let (confirm, next) = client.handle(&response(1, [0xA1, 0, 0, 0, 0, 0, 0, 0]));
		assert!(confirm.unwrap().abort.is_none());
		assert!(next.is_none());
	}

	#[test]
	fn block_upload_round_trip_with_crc() {
		let mut client = ClientSdo::new(1);
		let initiate = client.block_upload(0x2004, 0).unwrap();
		assert!(initiate.data()[0] >> 5 == 5);
		assert!(initiate.data()[4] == DEFAULT_BLOCK_SIZE);

		let payload: Vec<u8> = (0..100).map(|i| ((i * 3) % 256) as u8).collect();
		let size_bytes = (payload.len() as u32).to_le_bytes();
		let (confirm, next) = client.handle(&response(1, [0xC6, 0x04, 0x20, 0x00, size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]));
		assert!(confirm.is_none());
		let start_upload = next.unwrap();
		assert!(start_upload.data()[0] >> 5 == 5);

		let mut last_ack = None;
		for (i, chunk) in payload.chunks(7).enumerate() {
			let seq = (i + 1) as u8;
			let last = i == 14;
			let mut data = [0u8; 8];
			data[0] = seq | if last { 0x80 } else { 0 };
			data[1..1 + chunk.len()].copy_from_slice(chunk);
			let (confirm, next) = client.handle(&response(1, data));
			assert!(confirm.is_none());
			if last {
				last_ack = next;
			} else {
				assert!(next.is_none());
			}
		}
		let ack = last_ack.unwrap();
		assert!(ack.data()[0] >> 5 == 5);
		assert!(ack.data()[1] == 15);

		let crc = crate::crc::crc16(&payload);
		let crc_bytes = crc.to_le_bytes();
		let unused = ((15 * 7 - payload.len()) as u8) & 0b111;
		let end = [0xC1 | (unused << 2), crc_bytes[0], crc_bytes[1], 0, 0, 0, 0, 0];
		let (confirm, next) = client.handle(&response(1, end));
		let confirm = confirm.unwrap();
		assert!(confirm.abort.is_none());
		assert!(confirm.payload == payload);
		let final_ack = next.unwrap();
		assert!(final_ack.data()[0] >> 5 == 5);
	}
}
