//! Errors raised while building or mutating an object dictionary.

/// An error raised while constructing a [`crate::dict::device::Device`] or mutating its
/// object dictionary, surfaced before the network core ever runs.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DictionaryError {
	/// Two objects were registered at the same index.
	#[error("duplicate object at index {idx:#06x}")]
	DuplicateObject {
		/// The colliding index.
		idx: u16,
	},

	/// A sub-object's configured `[min, max]` pair has max below min.
	#[error("object {idx:#06x} sub {subidx} has max below min")]
	MaximumBelowMinimum {
		/// The owning object's index.
		idx: u16,
		/// The offending sub-index.
		subidx: u8,
	},

	/// A node-id outside `1..=127` (or the unassigned sentinel `255`) was supplied.
	#[error("node-id {0} is out of range (expected 1..=127 or 255 for unassigned)")]
	InvalidNodeId(u8),
}
