//! Timer registration tokens.

use std::num::NonZeroU64;

/// The logical clock used throughout the network core, in host-defined ticks (typically
/// milliseconds). The core never reads a wall clock itself; [`crate::net::NetworkCore::set_time`]
/// is the only way it advances.
pub type Timestamp = u64;

/// An opaque, non-owning handle to a timer armed on a [`crate::net::NetworkCore`].
///
/// Like [`crate::receiver::ReceiverId`], validity is checked against a generation counter;
/// operating on a handle whose timer already fired-and-expired (one-shot) or was stopped is
/// a no-op rather than an error.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerId {
	pub(crate) index: usize,
	pub(crate) generation: u64,
}

/// Whether a timer fires once or repeats.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Period {
	/// Fires once, at its armed expiry, then is removed.
	Once,
	/// Re-arms itself to `expiry + interval` after every firing.
	Every(NonZeroU64),
}

impl Period {
	/// Construct a periodic period from a tick count, or [`Period::Once`] if `interval` is 0.
	pub fn from_ticks(interval: u64) -> Self {
		match NonZeroU64::new(interval) {
			Some(interval) => Period::Every(interval),
			None => Period::Once,
		}
	}
}
