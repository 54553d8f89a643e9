//! A sans-io CANopen (CiA-301) protocol core: object dictionary, SDO client and server, PDO
//! mapping and execution, NMT state machine, heartbeat, SYNC, TIME and EMCY.
//!
//! Every component here is driven entirely by its caller: frames go in and out as plain
//! values, the clock only advances when told to, and nothing spawns a thread or talks to a
//! socket. [`net::NetworkCore`] provides the deterministic dispatcher and timer wheel that
//! ties a device's services together; a runtime-specific binding (such as `canopen-socket`)
//! drives it from a real clock and a real CAN interface.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod abort;
pub mod bittiming;
pub mod crc;
pub mod dict;
pub mod emcy;
pub mod frame;
pub mod framebuf;
pub mod net;
pub mod nmt;
pub mod pdo;
pub mod receiver;
pub mod sdo;
pub mod sync;
pub mod time_service;
pub mod timer;

pub use abort::AbortCode;
pub use dict::Device;
pub use frame::{Frame, FrameFlags};
pub use net::NetworkCore;
