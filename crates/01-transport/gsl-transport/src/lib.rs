//! Low-level shared-memory primitives used to build the Signal wait/notify
//! primitive and the shared-memory page allocator on top of plain Rust.
//!
//! * [`SharedRegion`] - contiguous, aligned memory backing every other type here.
//! * [`MsgRing`] - single-producer/single-consumer command/report queue.
//! * [`Mailbox`] - single-slot coalescing channel used for best-effort signalling.
//! * [`SlotPool`] - fixed-size slot allocator with free/ready index rings.
//! * [`wait`] - futex-style wait/wake shim backing blocking waits on [`Signal`](crate::wait).

mod error;
mod mailbox;
mod msg_ring;
mod region;
mod signal;
mod slot_pool;
pub mod wait;

pub use error::{TransportError, TransportResult};
pub use mailbox::{Mailbox, MailboxRecord, MailboxSend};
pub use msg_ring::{Envelope, MsgRing, ProducerGrant, Record};
pub use region::{SharedRegion, Uninit, Zeroed};
pub use signal::{Signal, SignalFlags, SignalOutcome, SignalPacket, SignalStatus};
pub use slot_pool::{SlotPool, SlotPoolConfig, SlotPop, SlotPush, SLOT_ALIGNMENT};
