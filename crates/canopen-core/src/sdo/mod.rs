//! SDO (Service Data Object) client and server state machines.
//!
//! Expedited, segmented, and block transfers in both directions, built on the command-byte
//! codec in [`command`] and the scatter/gather buffer in [`request`].

mod client;
mod command;
mod request;
mod server;

pub use client::{default_request_cob_id, default_response_cob_id, ClientSdo, Confirm, DEFAULT_CLIENT_ABORT};
pub use command::{BlockSubcommand, ClientCommandSpecifier, InitiateFlags, SegmentFlags, ServerCommandSpecifier};
pub use request::RequestBuffer;
pub use server::{default_rx_cob_id, default_tx_cob_id, ServerSdo, DEFAULT_BLOCK_SIZE};
