//! Network management: the NMT state machine, heartbeat and node-guarding, and bus redundancy.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::frame::{Frame, FrameFlags};
use crate::timer::Timestamp;

/// The COB-ID NMT commands are broadcast or addressed on.
pub const NMT_COMMAND_COB_ID: u32 = 0x000;

/// The heartbeat/node-guard COB-ID for `node_id`.
pub fn heartbeat_cob_id(node_id: u8) -> u32 {
	0x700 + node_id as u32
}

/// The NMT state of a CANopen node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NmtState {
	/// Initializing; transitions automatically to `PreOperational` once boot-up completes.
	Initializing = 0x00,
	/// Communication is limited to NMT, SYNC, TIME, EMCY, node-guarding and SDO.
	Stopped = 0x04,
	/// Full communication, including PDOs.
	Operational = 0x05,
	/// Communication is limited to NMT, SYNC, TIME, EMCY, node-guarding and SDO; the default
	/// state after boot-up.
	PreOperational = 0x7F,
}

impl std::fmt::Display for NmtState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Initializing => write!(f, "initializing"),
			Self::Stopped => write!(f, "stopped"),
			Self::Operational => write!(f, "operational"),
			Self::PreOperational => write!(f, "pre-operational"),
		}
	}
}

/// An NMT command, as broadcast or addressed to a single node by the master.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NmtCommand {
	/// Go to [`NmtState::Operational`].
	Start = 1,
	/// Go to [`NmtState::Stopped`].
	Stop = 2,
	/// Go to [`NmtState::PreOperational`].
	GoToPreOperational = 128,
	/// Go to [`NmtState::Initializing`] (full reset).
	Reset = 129,
	/// Go to [`NmtState::Initializing`], resetting communication parameters only.
	ResetCommunication = 130,
}

impl NmtCommand {
	/// The state a node reaches after applying this command.
	pub const fn target_state(self) -> NmtState {
		match self {
			Self::Start => NmtState::Operational,
			Self::Stop => NmtState::Stopped,
			Self::GoToPreOperational => NmtState::PreOperational,
			Self::Reset | Self::ResetCommunication => NmtState::Initializing,
		}
	}
}

/// The slave-side NMT state machine for one local node.
#[derive(Debug)]
pub struct NmtSlave {
	node_id: u8,
	state: NmtState,
}

impl NmtSlave {
	/// A slave starting in `Initializing`.
	pub fn new(node_id: u8) -> Self {
		Self { node_id, state: NmtState::Initializing }
	}

	/// The current NMT state.
	pub fn state(&self) -> NmtState {
		self.state
	}

	/// Complete initialization: transition to `PreOperational` and produce the one-shot
	/// boot-up frame, which must be sent before any periodic heartbeat.
	pub fn boot(&mut self) -> Frame {
		self.state = NmtState::PreOperational;
		self.heartbeat_frame_with_state(bootup_byte())
	}

	/// Apply an incoming NMT command frame if it addresses this node (node-id `0` is the
	/// broadcast address). Returns the new state if the command was applied.
	pub fn handle_frame(&mut self, frame: &Frame) -> Option<NmtState> {
		if frame.id() != NMT_COMMAND_COB_ID {
			return None;
		}
		let data = frame.data();
		if data.len() != 2 {
			return None;
		}
		let command = NmtCommand::try_from(data[0]).ok()?;
		let target = data[1];
		if target != 0 && target != self.node_id {
			return None;
		}
		self.state = command.target_state();
		Some(self.state)
	}

	/// Build this node's current periodic heartbeat frame.
	pub fn heartbeat_frame(&self) -> Frame {
		self.heartbeat_frame_with_state(self.state.into())
	}

	fn heartbeat_frame_with_state(&self, byte: u8) -> Frame {
		Frame::new(heartbeat_cob_id(self.node_id), FrameFlags::empty(), &[byte]).expect("node-id keeps COB-ID in range")
	}
}

fn bootup_byte() -> u8 {
	0x00
}

/// The master-side NMT command source: builds command frames addressed to a node or broadcast.
#[derive(Debug)]
pub struct NmtMaster;

impl NmtMaster {
	/// Build a command frame. `node_id` of `0` broadcasts to every node.
	pub fn command_frame(node_id: u8, command: NmtCommand) -> Frame {
		Frame::new(NMT_COMMAND_COB_ID, FrameFlags::empty(), &[command.into(), node_id]).expect("fixed two-byte payload")
	}
}

/// Whether a supervised node's heartbeat is currently present or missing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeartbeatStatus {
	/// A deadline passed with no heartbeat seen.
	Occurred,
	/// A heartbeat arrived after a prior `Occurred` event.
	Resolved,
}

/// Why a [`HeartbeatStatus`] event was raised.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeartbeatReason {
	/// The consumer deadline elapsed with no frame received.
	Timeout,
	/// A frame was received reporting the node's current state.
	State(NmtState),
}

/// One heartbeat supervision event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeartbeatEvent {
	/// The supervised node.
	pub node_id: u8,
	/// Whether the heartbeat is now present or absent.
	pub status: HeartbeatStatus,
	/// Why this event fired.
	pub reason: HeartbeatReason,
}

/// Consumes heartbeat (or boot-up) frames from one remote node and raises an event when the
/// configured deadline passes with none received.
///
/// A boot-up frame counts as a first heartbeat for the purpose of starting the deadline,
/// matching the boot-up/heartbeat equivalence CiA-301 specifies for consumers.
#[derive(Debug)]
pub struct HeartbeatConsumer {
	node_id: u8,
	deadline_ms: u32,
	last_seen: Option<Timestamp>,
	missed: bool,
}

impl HeartbeatConsumer {
	/// Supervise `node_id`, declaring it missing if no frame arrives within `deadline_ms` of
	/// the last one (or of construction, before any frame has arrived). `deadline_ms == 0`
	/// disables supervision: [`Self::poll`] never raises an event.
	pub fn new(node_id: u8, deadline_ms: u32) -> Self {
		Self { node_id, deadline_ms, last_seen: None, missed: false }
	}

	/// Feed a candidate frame. Returns a `Resolved` event if this frame clears a prior
	/// timeout.
	pub fn handle_frame(&mut self, frame: &Frame, now: Timestamp) -> Option<HeartbeatEvent> {
		if frame.id() != heartbeat_cob_id(self.node_id) {
			return None;
		}
		let data = frame.data();
		if data.len() != 1 {
			return None;
		}
		let state = NmtState::try_from(data[0]).ok();
		self.last_seen = Some(now);
		if self.missed {
			self.missed = false;
			return Some(HeartbeatEvent {
				node_id: self.node_id,
				status: HeartbeatStatus::Resolved,
				reason: state.map(HeartbeatReason::State).unwrap_or(HeartbeatReason::Timeout),
			});
		}
		None
	}

	/// Check whether the deadline has elapsed since the last frame (or construction).
	pub fn poll(&mut self, now: Timestamp) -> Option<HeartbeatEvent> {
		if self.deadline_ms == 0 || self.missed {
			return None;
		}
		let baseline = self.last_seen.unwrap_or(0);
		if now.saturating_sub(baseline) < self.deadline_ms as u64 {
			return None;
		}
		self.missed = true;
		Some(HeartbeatEvent { node_id: self.node_id, status: HeartbeatStatus::Occurred, reason: HeartbeatReason::Timeout })
	}
}

/// Classic node-guarding producer: responds to the master's RTR with a state byte whose top bit
/// toggles every response.
#[derive(Debug)]
pub struct NodeGuardProducer {
	node_id: u8,
	toggle: bool,
}

impl NodeGuardProducer {
	/// A producer for `node_id`, starting with the toggle bit clear.
	pub fn new(node_id: u8) -> Self {
		Self { node_id, toggle: false }
	}

	/// Build the guard response for the node's current `state`, flipping the toggle bit for
	/// next time.
	pub fn respond(&mut self, state: NmtState) -> Frame {
		let byte = (u8::from(state) & 0x7F) | if self.toggle { 0x80 } else { 0x00 };
		self.toggle = !self.toggle;
		Frame::new(heartbeat_cob_id(self.node_id), FrameFlags::empty(), &[byte]).expect("node-id keeps COB-ID in range")
	}
}

/// Classic node-guarding consumer: expects a guard response within `guard_time_ms ×
/// life_time_factor` of the last one.
///
/// Predates heartbeat-based monitoring; a node configured with a nonzero heartbeat producer
/// time prefers that mechanism, falling back to node-guarding only when the heartbeat time is
/// zero and a nonzero guard time is configured.
#[derive(Debug)]
pub struct NodeGuardConsumer {
	inner: HeartbeatConsumer,
}

impl NodeGuardConsumer {
	/// Supervise `node_id` via classic node-guarding.
	pub fn new(node_id: u8, guard_time_ms: u32, life_time_factor: u8) -> Self {
		let deadline = guard_time_ms.saturating_mul(life_time_factor as u32);
		Self { inner: HeartbeatConsumer::new(node_id, deadline) }
	}

	/// Feed a candidate guard-response frame.
	pub fn handle_frame(&mut self, frame: &Frame, now: Timestamp) -> Option<HeartbeatEvent> {
		self.inner.handle_frame(frame, now)
	}

	/// Check whether the guard deadline has elapsed.
	pub fn poll(&mut self, now: Timestamp) -> Option<HeartbeatEvent> {
		self.inner.poll(now)
	}
}

/// Why a redundancy indication was raised.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RedundancyReason {
	/// No nodes have been heard from on any bus.
	NoContact,
	/// The master actively switched buses.
	BusSwitch,
}

/// ECSS-style bus redundancy: tracks the currently active bus and notifies on switches.
#[derive(Debug)]
pub struct RedundancyManager {
	active_bus: u8,
}

impl RedundancyManager {
	/// Start on `initial_bus`.
	pub fn new(initial_bus: u8) -> Self {
		Self { active_bus: initial_bus }
	}

	/// The currently active bus id.
	pub fn active_bus(&self) -> u8 {
		self.active_bus
	}

	/// Switch to `bus_id`, returning the event to report to the redundancy indication
	/// callback, unless `bus_id` is already active.
	pub fn switch_to(&mut self, bus_id: u8, reason: RedundancyReason) -> Option<(u8, RedundancyReason)> {
		if bus_id == self.active_bus {
			return None;
		}
		self.active_bus = bus_id;
		Some((bus_id, reason))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;

	#[test]
	fn boot_transitions_to_pre_operational_and_emits_bootup_byte() {
		let mut slave = NmtSlave::new(5);
		let frame = slave.boot();
		assert!(slave.state() == NmtState::PreOperational);
		assert!(frame.id() == 0x705);
		assert!(frame.data() == [0x00]);
	}

	#[test]
	fn command_addressed_to_self_applies() {
		let mut slave = NmtSlave::new(5);
		slave.boot();
		let command = NmtMaster::command_frame(5, NmtCommand::Start);
		assert!(slave.handle_frame(&command) == Some(NmtState::Operational));
	}

	#[test]
	fn command_addressed_to_other_node_is_ignored() {
		let mut slave = NmtSlave::new(5);
		slave.boot();
		let command = NmtMaster::command_frame(6, NmtCommand::Start);
		assert!(slave.handle_frame(&command).is_none());
		assert!(slave.state() == NmtState::PreOperational);
	}

	#[test]
	fn broadcast_command_applies_to_every_node() {
		let mut slave = NmtSlave::new(5);
		slave.boot();
		let command = NmtMaster::command_frame(0, NmtCommand::Stop);
		assert!(slave.handle_frame(&command) == Some(NmtState::Stopped));
	}

	#[test]
	fn heartbeat_timeout_then_resolution() {
		let mut consumer = HeartbeatConsumer::new(5, 100);
		assert!(consumer.poll(50).is_none());
		let event = consumer.poll(100).unwrap();
		assert!(event.status == HeartbeatStatus::Occurred);

		let beat = Frame::new(heartbeat_cob_id(5), FrameFlags::empty(), &[NmtState::Operational.into()]).unwrap();
		let event = consumer.handle_frame(&beat, 120).unwrap();
		assert!(event.status == HeartbeatStatus::Resolved);
		assert!(consumer.poll(200).is_none());
	}

	#[test]
	fn bootup_frame_counts_as_heartbeat_for_deadline_start() {
		let mut slave = NmtSlave::new(5);
		let bootup = slave.boot();
		let mut consumer = HeartbeatConsumer::new(5, 100);
		assert!(consumer.handle_frame(&bootup, 0).is_none());
		assert!(consumer.poll(90).is_none());
		assert!(consumer.poll(100).is_some());
	}

	#[test]
	fn node_guard_toggle_alternates() {
		let mut producer = NodeGuardProducer::new(5);
		let first = producer.respond(NmtState::Operational);
		let second = producer.respond(NmtState::Operational);
		assert!(first.data()[0] & 0x80 == 0);
		assert!(second.data()[0] & 0x80 == 0x80);
	}

	#[test]
	fn redundancy_switch_reports_event_only_on_change() {
		let mut manager = RedundancyManager::new(0);
		assert!(manager.switch_to(0, RedundancyReason::BusSwitch).is_none());
		let event = manager.switch_to(1, RedundancyReason::NoContact).unwrap();
		assert!(event == (1, RedundancyReason::NoContact));
		assert!(manager.active_bus() == 1);
	}
}
