//! The clock-driven frame dispatcher and timer-wheel engine.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::frame::Frame;
use crate::receiver::{Filter, ReceiverId};
use crate::timer::{Period, TimerId, Timestamp};

/// The result of a receiver callback: `Ok(())` on success, or an error that is logged but
/// does not halt dispatch of the remaining matching receivers.
pub type ReceiveResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

/// A callback invoked for every frame matching a receiver's filter.
pub type ReceiverCallback = Box<dyn FnMut(&mut NetworkCore, &Frame) -> ReceiveResult>;

/// A callback invoked when a timer fires, carrying the id of the timer and the absolute
/// expiry that triggered this firing (not necessarily the current clock, in case of
/// catch-up).
pub type TimerCallback = Box<dyn FnMut(&mut NetworkCore, TimerId, Timestamp)>;

/// A callback invoked to actually transmit a frame onto the bus.
pub type SendCallback = Box<dyn FnMut(&Frame) -> Result<(), SendError>>;

/// A callback invoked whenever the earliest armed timer expiry changes.
///
/// `None` means no timer is currently armed. The host uses this to schedule its next call
/// to [`NetworkCore::set_time`].
pub type NextTimerCallback = Box<dyn FnMut(Option<Timestamp>)>;

/// Error returned by [`NetworkCore::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
	/// No send callback has been installed yet.
	#[error("no send callback installed")]
	NoCallback,

	/// The installed send callback reported a failure.
	#[error(transparent)]
	Transport(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Error returned by [`NetworkCore::set_time`].
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum SetTimeError {
	/// The requested time is strictly before the network's current clock.
	#[error("time {requested} is before the current clock {current}")]
	NotMonotonic {
		/// The network's current clock value.
		current: Timestamp,
		/// The rejected, earlier time.
		requested: Timestamp,
	},
}

struct ReceiverSlot {
	generation: u64,
	filter: Filter,
	callback: Option<ReceiverCallback>,
}

struct TimerSlot {
	generation: u64,
	seq: u64,
	expiry: Timestamp,
	period: Period,
	armed: bool,
	callback: Option<TimerCallback>,
}

#[derive(Copy, Clone, Eq, PartialEq)]
struct HeapEntry {
	expiry: Timestamp,
	seq: u64,
	index: usize,
}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		(self.expiry, self.seq, self.index).cmp(&(other.expiry, other.seq, other.index))
	}
}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

/// The deterministic, time-driven frame dispatcher and timer engine.
///
/// A `NetworkCore` owns a set of receivers keyed by filter and a heap of armed timers. It
/// has no knowledge of any particular transport or runtime: frames arrive through
/// [`Self::recv`], are pushed out through an installed [`SendCallback`], and time advances
/// only when the host calls [`Self::set_time`].
#[allow(missing_debug_implementations)]
pub struct NetworkCore {
	clock: Timestamp,
	receivers: Vec<Option<ReceiverSlot>>,
	receiver_free: Vec<usize>,
	receiver_generation: u64,
	timers: Vec<Option<TimerSlot>>,
	timer_free: Vec<usize>,
	timer_generation: u64,
	heap: BinaryHeap<Reverse<HeapEntry>>,
	send: Option<SendCallback>,
	next_timer: Option<NextTimerCallback>,
}

impl Default for NetworkCore {
	fn default() -> Self {
		Self::new()
	}
}

impl NetworkCore {
	/// Create a new, empty network core. No receivers, no timers, no callbacks installed.
	pub fn new() -> Self {
		Self {
			clock: 0,
			receivers: Vec::new(),
			receiver_free: Vec::new(),
			receiver_generation: 0,
			timers: Vec::new(),
			timer_free: Vec::new(),
			timer_generation: 0,
			heap: BinaryHeap::new(),
			send: None,
			next_timer: None,
		}
	}

	/// Install (or replace) the callback used to actually transmit frames.
	pub fn set_send_callback(&mut self, callback: SendCallback) {
		self.send = Some(callback);
	}

	/// Install (or replace) the callback invoked when the earliest timer expiry changes.
	pub fn set_next_timer_callback(&mut self, callback: NextTimerCallback) {
		self.next_timer = Some(callback);
		self.notify_next_timer();
	}

	/// The network's current logical clock.
	pub fn get_time(&self) -> Timestamp {
		self.clock
	}

	/// Register a receiver. Its callback runs once per [`Self::recv`] call whose frame
	/// matches `filter`, in the order receivers were registered.
	pub fn register_receiver(&mut self, filter: Filter, callback: ReceiverCallback) -> ReceiverId {
		let generation = self.receiver_generation;
		self.receiver_generation += 1;
		let slot = ReceiverSlot { generation, filter, callback: Some(callback) };
		let index = match self.receiver_free.pop() {
			Some(index) => {
				self.receivers[index] = Some(slot);
				index
			}
			None => {
				self.receivers.push(Some(slot));
				self.receivers.len() - 1
			}
		};
		ReceiverId { index, generation }
	}

	/// Deregister a receiver. Returns `true` if it was still registered.
	///
	/// If called while the receiver's own callback is executing (self-deregistration), the
	/// callback still finishes running for the frame currently being dispatched.
	pub fn deregister_receiver(&mut self, id: ReceiverId) -> bool {
		match self.receivers.get_mut(id.index).and_then(Option::as_mut) {
			Some(slot) if slot.generation == id.generation => {
				self.receivers[id.index] = None;
				self.receiver_free.push(id.index);
				true
			}
			_ => false,
		}
	}

	/// Dispatch a received frame to every matching receiver, in registration order.
	///
	/// Returns the number of receivers invoked. Registrations and deregistrations performed
	/// by a callback take effect for subsequent calls to `recv`, not the one in progress: the
	/// set of receivers to invoke is captured before any of them runs.
	pub fn recv(&mut self, frame: &Frame) -> usize {
		let mut pending = Vec::new();
		for (index, slot) in self.receivers.iter_mut().enumerate() {
			let Some(slot) = slot else { continue };
			if !slot.filter.matches(frame) {
				continue;
			}
			if let Some(callback) = slot.callback.take() {
				pending.push((index, slot.generation, callback));
			}
		}

		let mut invoked = 0;
		for (index, generation, mut callback) in pending {
			invoked += 1;
			if let Err(error) = callback(self, frame) {
				log::warn!("receiver callback returned an error: {error}");
			}
			if let Some(slot) = self.receivers.get_mut(index).and_then(Option::as_mut) {
				if slot.generation == generation && slot.callback.is_none() {
					slot.callback = Some(callback);
				}
			}
		}
		invoked
	}

	/// Transmit a frame through the installed send callback.
	pub fn send(&mut self, frame: &Frame) -> Result<(), SendError> {
		match self.send.as_mut() {
			Some(callback) => callback(frame),
			None => Err(SendError::NoCallback),
		}
	}

	/// Arm a timer. `expiry` is an absolute time on the network's logical clock; if it is
	/// already ≤ the current clock, the timer fires on the very next [`Self::set_time`] call.
	pub fn register_timer(&mut self, expiry: Timestamp, period: Period, callback: TimerCallback) -> TimerId {
		let generation = self.timer_generation;
		self.timer_generation += 1;
		let slot = TimerSlot { generation, seq: 0, expiry, period, armed: true, callback: Some(callback) };
		let index = match self.timer_free.pop() {
			Some(index) => {
				self.timers[index] = Some(slot);
				index
			}
			None => {
				self.timers.push(Some(slot));
				self.timers.len() - 1
			}
		};
		self.heap.push(Reverse(HeapEntry { expiry, seq: 0, index }));
		self.notify_next_timer();
		TimerId { index, generation }
	}

	/// Stop a timer. Returns `true` if it was still armed.
	///
	/// Stopping a timer whose callback is currently being invoked (from within
	/// [`Self::set_time`]) does not retract that in-progress callback.
	pub fn stop_timer(&mut self, id: TimerId) -> bool {
		match self.timers.get_mut(id.index).and_then(Option::as_mut) {
			Some(slot) if slot.generation == id.generation && slot.armed => {
				slot.armed = false;
				if slot.callback.is_some() {
					// Not mid-callback: free the slot immediately.
					self.timers[id.index] = None;
					self.timer_free.push(id.index);
				}
				self.notify_next_timer();
				true
			}
			_ => false,
		}
	}

	/// True if `id` still refers to an armed timer.
	pub fn is_armed(&self, id: TimerId) -> bool {
		matches!(self.timers.get(id.index).and_then(Option::as_ref), Some(slot) if slot.generation == id.generation && slot.armed)
	}

	/// Advance the logical clock to `t`, firing every armed timer with expiry ≤ t in
	/// ascending order of expiry. `t` must be ≥ the current clock; passing an earlier time is
	/// rejected, passing the same time is a no-op.
	///
	/// A periodic timer re-arms to `expiry + interval` after every firing; if that next
	/// expiry is still ≤ t it fires again immediately, so its callback runs once per elapsed
	/// period and its next armed expiry after this call is always strictly greater than `t`.
	pub fn set_time(&mut self, t: Timestamp) -> Result<(), SetTimeError> {
		if t < self.clock {
			return Err(SetTimeError::NotMonotonic { current: self.clock, requested: t });
		}
		if t == self.clock {
			return Ok(());
		}
		self.clock = t;

		loop {
			let Some(&Reverse(top)) = self.heap.peek() else { break };
			if top.expiry > t {
				break;
			}
			self.heap.pop();

			let Some(slot) = self.timers.get_mut(top.index).and_then(Option::as_mut) else { continue };
			if !slot.armed || slot.seq != top.seq {
				// Stale tombstone: the timer was stopped or already re-armed since this
				// heap entry was pushed.
				continue;
			}

			let Some(mut callback) = slot.callback.take() else { continue };
			let fired_expiry = slot.expiry;

			match slot.period {
				Period::Once => {
					slot.armed = false;
				}
				Period::Every(interval) => {
					let next = fired_expiry.saturating_add(interval.get());
					slot.expiry = next;
					slot.seq += 1;
					self.heap.push(Reverse(HeapEntry { expiry: next, seq: slot.seq, index: top.index }));
				}
			}

			let id = TimerId { index: top.index, generation: slot.generation };
			callback(self, id, fired_expiry);

			match self.timers.get_mut(top.index).and_then(Option::as_mut) {
				Some(slot) if slot.armed && slot.callback.is_none() => {
					slot.callback = Some(callback);
				}
				Some(slot) if !slot.armed => {
					self.timers[top.index] = None;
					self.timer_free.push(top.index);
				}
				_ => {}
			}
		}

		self.notify_next_timer();
		Ok(())
	}

	fn notify_next_timer(&mut self) {
		let Some(callback) = self.next_timer.as_mut() else { return };
		callback(self.heap.peek().map(|Reverse(entry)| entry.expiry));
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};
	use crate::frame::FrameFlags;
	use std::cell::RefCell;
	use std::rc::Rc;

	fn frame(id: u32) -> Frame {
		Frame::new(id, FrameFlags::empty(), &[]).unwrap()
	}

	#[test]
	fn recv_invokes_matching_receivers_and_counts_them() {
		let mut net = NetworkCore::new();
		let hits = Rc::new(RefCell::new(0));
		let hits_clone = hits.clone();
		net.register_receiver(Filter::exact(0x100, false, false), Box::new(move |_net, _frame| {
			*hits_clone.borrow_mut() += 1;
			Ok(())
		}));
		net.register_receiver(Filter::exact(0x200, false, false), Box::new(|_net, _frame| Ok(())));

		let invoked = net.recv(&frame(0x100));
		assert!(invoked == 1);
		assert!(*hits.borrow() == 1);
	}

	#[test]
	fn recv_respects_registration_order() {
		let mut net = NetworkCore::new();
		let order = Rc::new(RefCell::new(Vec::new()));
		for tag in 0..3 {
			let order = order.clone();
			net.register_receiver(Filter::exact(0x100, false, false), Box::new(move |_net, _frame| {
				order.borrow_mut().push(tag);
				Ok(())
			}));
		}
		net.recv(&frame(0x100));
		assert!(*order.borrow() == vec![0, 1, 2]);
	}

	#[test]
	fn deregistered_receiver_still_runs_for_in_progress_frame() {
		let mut net = NetworkCore::new();
		let second_ran = Rc::new(RefCell::new(false));
		let second_ran_clone = second_ran.clone();

		// Registered second, so it is captured in the same `recv` snapshot as the first.
		let second_id_cell: Rc<RefCell<Option<ReceiverId>>> = Rc::new(RefCell::new(None));
		let second_id_cell_clone = second_id_cell.clone();
		net.register_receiver(Filter::exact(0x100, false, false), Box::new(move |net, _frame| {
			if let Some(id) = *second_id_cell_clone.borrow() {
				net.deregister_receiver(id);
			}
			Ok(())
		}));
		let second = net.register_receiver(Filter::exact(0x100, false, false), Box::new(move |_net, _frame| {
			*second_ran_clone.borrow_mut() = true;
			Ok(())
		}));
		*second_id_cell.borrow_mut() = Some(second);

		net.recv(&frame(0x100));
		assert!(*second_ran.borrow());

		// But it no longer fires for the next frame.
		*second_ran.borrow_mut() = false;
		net.recv(&frame(0x100));
		assert!(!*second_ran.borrow());
	}

	#[test]
	fn set_time_rejects_non_monotonic_and_allows_equal() {
		let mut net = NetworkCore::new();
		net.set_time(10).unwrap();
		let_assert!(Err(SetTimeError::NotMonotonic { current: 10, requested: 5 }) = net.set_time(5));
		assert!(net.set_time(10).is_ok());
		assert!(net.get_time() == 10);
	}

	#[test]
	fn one_shot_timer_fires_once() {
		let mut net = NetworkCore::new();
		let fired = Rc::new(RefCell::new(0));
		let fired_clone = fired.clone();
		net.register_timer(10, Period::Once, Box::new(move |_net, _id, _expiry| {
			*fired_clone.borrow_mut() += 1;
		}));
		net.set_time(5).unwrap();
		assert!(*fired.borrow() == 0);
		net.set_time(10).unwrap();
		assert!(*fired.borrow() == 1);
		net.set_time(20).unwrap();
		assert!(*fired.borrow() == 1);
	}

	#[test]
	fn periodic_timer_drift_recovery() {
		// Scenario 6: interval 10 armed at t=0, next set_time at t=35.
		// Fires for expiries 10, 20, 30 (three invocations), next armed expiry is 40.
		let mut net = NetworkCore::new();
		let fires = Rc::new(RefCell::new(Vec::new()));
		let fires_clone = fires.clone();
		let id = net.register_timer(10, Period::from_ticks(10), Box::new(move |_net, _id, expiry| {
			fires_clone.borrow_mut().push(expiry);
		}));
		net.set_time(35).unwrap();
		assert!(*fires.borrow() == vec![10, 20, 30]);
		assert!(net.is_armed(id));
	}

	#[test]
	fn periodic_timer_invocation_count_matches_invariant() {
		// ∀ timer T with expiry t0 and interval p: after set_time(t) with t >= t0, the
		// number of invocations equals 1 + floor((t - t0) / p).
		let mut net = NetworkCore::new();
		let count = Rc::new(RefCell::new(0));
		let count_clone = count.clone();
		net.register_timer(5, Period::from_ticks(3), Box::new(move |_net, _id, _expiry| {
			*count_clone.borrow_mut() += 1;
		}));
		net.set_time(17).unwrap();
		assert!(*count.borrow() == 1 + (17 - 5) / 3);
	}

	#[test]
	fn stopping_a_timer_prevents_further_firing() {
		let mut net = NetworkCore::new();
		let fired = Rc::new(RefCell::new(0));
		let fired_clone = fired.clone();
		let id = net.register_timer(10, Period::from_ticks(10), Box::new(move |_net, _id, _expiry| {
			*fired_clone.borrow_mut() += 1;
		}));
		net.set_time(10).unwrap();
		assert!(*fired.borrow() == 1);
		assert!(net.stop_timer(id));
		net.set_time(100).unwrap();
		assert!(*fired.borrow() == 1);
	}

	#[test]
	fn next_timer_callback_reports_earliest_expiry() {
		let mut net = NetworkCore::new();
		let reported = Rc::new(RefCell::new(None));
		let reported_clone = reported.clone();
		net.set_next_timer_callback(Box::new(move |expiry| {
			*reported_clone.borrow_mut() = expiry;
		}));
		net.register_timer(50, Period::Once, Box::new(|_, _, _| {}));
		assert!(*reported.borrow() == Some(50));
		net.register_timer(20, Period::Once, Box::new(|_, _, _| {}));
		assert!(*reported.borrow() == Some(20));
	}

	#[test]
	fn send_without_callback_errors() {
		let mut net = NetworkCore::new();
		let_assert!(Err(SendError::NoCallback) = net.send(&frame(1)));
	}

	#[test]
	fn send_invokes_installed_callback() {
		let mut net = NetworkCore::new();
		let sent = Rc::new(RefCell::new(None));
		let sent_clone = sent.clone();
		net.set_send_callback(Box::new(move |frame| {
			*sent_clone.borrow_mut() = Some(frame.id());
			Ok(())
		}));
		net.send(&frame(0x123)).unwrap();
		assert!(*sent.borrow() == Some(0x123));
	}
}
