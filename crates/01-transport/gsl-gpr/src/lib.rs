//! GPR (Generic Packet Router) transport facade: port/service abstractions
//! plus the [`GprTransport`] command/reply router built on top of them.

mod codec;
mod error;
mod gpr;
mod policy;
mod port;
mod service;
mod span;

pub use codec::{Codec, Encoded};
pub use error::{GprError, GprResult};
pub use gpr::{GprPacket, GprTransport, SpfSink, BASIC_RSP_OPCODE};
pub use policy::SubmitPolicy;
pub use port::{
    make_port_pair_mailbox, make_port_pair_ring, ConsumerPort, PortMetricsSnapshot, PortPair,
    ProducerPort, SharedPort,
};
pub use service::{Service, SubmitOutcome};
pub use span::SlotSpan;
