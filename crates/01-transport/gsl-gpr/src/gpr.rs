//! GPR (Generic Packet Router) transport facade.
//!
//! Mirrors the real `gpr_packet_t`/`__gpr_cmd_*` API: a packet carries an
//! opcode, a source/destination port pair, and a token used to correlate a
//! command with its reply. `allocate_packet`/`send_cmd` wrap that convention;
//! reply correlation is implemented literally per the registration scheme a
//! single source/destination port pair needs: register a send-half of a
//! bounded channel keyed by the source port, have the dispatch callback only
//! enqueue, and have waiters dequeue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gsl_transport::{Signal, SignalFlags, SignalPacket};
use log::warn;
use parking_lot::Mutex;

use crate::error::{GprError, GprResult};

/// A GPR packet: opcode-tagged bytes routed by source/destination port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GprPacket {
    pub opcode: u32,
    pub src_port: u32,
    pub dst_port: u32,
    pub token: u32,
    pub payload: Vec<u8>,
}

/// Opcode reserved for a basic command-acknowledgement reply, the only
/// opcode `GprTransport` itself interprets; every other opcode is routed to
/// the async-event channel registered for its destination port.
pub const BASIC_RSP_OPCODE: u32 = 0x0001_0000;

/// Sink a `GprTransport` writes outbound packets to; implemented by the real
/// SPF transport or, in tests, by an in-memory mock.
pub trait SpfSink: Send + Sync {
    fn send(&self, packet: GprPacket) -> GprResult<()>;
}

struct InFlight {
    signal: Arc<Signal>,
}

/// Routes outbound command packets to a [`SpfSink`] and correlates inbound
/// replies back to the waiting caller by token, or to a registered async
/// event channel keyed by destination port.
pub struct GprTransport {
    next_token: AtomicU32,
    in_flight: Mutex<HashMap<u32, InFlight>>,
    events: Mutex<HashMap<u32, crossbeam_channel::Sender<GprPacket>>>,
}

impl Default for GprTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl GprTransport {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU32::new(1),
            in_flight: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a send-half for unsolicited/async packets destined for
    /// `port`; returns the receive-half for the caller to drain.
    pub fn register_port(&self, port: u32) -> crossbeam_channel::Receiver<GprPacket> {
        let (tx, rx) = crossbeam_channel::bounded(64);
        self.events.lock().insert(port, tx);
        rx
    }

    pub fn deregister_port(&self, port: u32) {
        self.events.lock().remove(&port);
    }

    /// Allocates a packet with a fresh token, matching `gsl_msg_alloc`.
    pub fn allocate_packet(
        &self,
        opcode: u32,
        src_port: u32,
        dst_port: u32,
        payload: Vec<u8>,
    ) -> GprPacket {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        GprPacket {
            opcode,
            src_port,
            dst_port,
            token,
            payload,
        }
    }

    /// Sends `packet` via `sink` and blocks until the matching reply arrives
    /// or `timeout` elapses.
    pub fn send_cmd(
        &self,
        sink: &dyn SpfSink,
        packet: GprPacket,
        timeout: Duration,
    ) -> GprResult<Vec<u8>> {
        let signal = Arc::new(Signal::new());
        signal.arm(packet.token as u64);
        self.in_flight.lock().insert(
            packet.token,
            InFlight {
                signal: Arc::clone(&signal),
            },
        );

        let token = packet.token;
        let send_result = sink.send(packet);
        if let Err(err) = send_result {
            self.in_flight.lock().remove(&token);
            return Err(err);
        }

        let outcome = signal.timedwait(timeout);
        self.in_flight.lock().remove(&token);

        if outcome.flags.contains(SignalFlags::TIMEOUT) {
            return Err(GprError::Timeout);
        }
        match outcome.status {
            Ok(()) => Ok(outcome.packet.map(|SignalPacket(bytes)| bytes).unwrap_or_default()),
            Err(status) => Err(GprError::Unsupported(status_str(status))),
        }
    }

    /// Dispatches a packet received from SPF: a matching-token basic reply
    /// wakes the waiting `send_cmd` call, otherwise the packet is routed to
    /// the async event channel registered for its destination port.
    pub fn dispatch_incoming(&self, packet: GprPacket) {
        if packet.opcode == BASIC_RSP_OPCODE {
            let in_flight = self.in_flight.lock();
            if let Some(entry) = in_flight.get(&packet.token) {
                entry.signal.set(
                    packet.token as u64,
                    SignalFlags::SPF_RSP,
                    Ok(()),
                    Some(SignalPacket(packet.payload)),
                );
                return;
            }
            drop(in_flight);
            warn!(
                "gpr: dropping basic_rsp for unknown token {}",
                packet.token
            );
            return;
        }

        let events = self.events.lock();
        match events.get(&packet.dst_port) {
            Some(sender) => {
                if sender.try_send(packet).is_err() {
                    warn!("gpr: event channel full or closed, dropping packet");
                }
            }
            None => {
                warn!(
                    "gpr: no registered port for opcode {:#x} dst_port {}, dropping packet",
                    packet.opcode, packet.dst_port
                );
            }
        }
    }
}

fn status_str(status: u32) -> &'static str {
    match status {
        0 => "ok",
        _ => "spf command failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct LoopbackSink {
        transport: Arc<GprTransport>,
    }

    impl SpfSink for LoopbackSink {
        fn send(&self, packet: GprPacket) -> GprResult<()> {
            let transport = Arc::clone(&self.transport);
            let reply = GprPacket {
                opcode: BASIC_RSP_OPCODE,
                src_port: packet.dst_port,
                dst_port: packet.src_port,
                token: packet.token,
                payload: b"ack".to_vec(),
            };
            thread::spawn(move || {
                transport.dispatch_incoming(reply);
            });
            Ok(())
        }
    }

    #[test]
    fn send_cmd_round_trips_basic_rsp() {
        let transport = Arc::new(GprTransport::new());
        let sink = LoopbackSink {
            transport: Arc::clone(&transport),
        };
        let packet = transport.allocate_packet(0x1001, 10, 20, b"open".to_vec());
        let reply = transport
            .send_cmd(&sink, packet, Duration::from_secs(1))
            .expect("reply");
        assert_eq!(reply, b"ack");
    }

    #[test]
    fn send_cmd_times_out_without_reply() {
        struct BlackHole;
        impl SpfSink for BlackHole {
            fn send(&self, _packet: GprPacket) -> GprResult<()> {
                Ok(())
            }
        }
        let transport = GprTransport::new();
        let packet = transport.allocate_packet(0x1001, 1, 2, Vec::new());
        let result = transport.send_cmd(&BlackHole, packet, Duration::from_millis(20));
        assert!(matches!(result, Err(GprError::Timeout)));
    }

    #[test]
    fn unregistered_port_drops_async_event() {
        let transport = GprTransport::new();
        transport.dispatch_incoming(GprPacket {
            opcode: 0x2001,
            src_port: 5,
            dst_port: 99,
            token: 0,
            payload: Vec::new(),
        });
    }

    #[test]
    fn registered_port_receives_async_event() {
        let transport = GprTransport::new();
        let rx = transport.register_port(42);
        transport.dispatch_incoming(GprPacket {
            opcode: 0x2001,
            src_port: 5,
            dst_port: 42,
            token: 0,
            payload: b"event".to_vec(),
        });
        let packet = rx.recv_timeout(Duration::from_secs(1)).expect("event");
        assert_eq!(packet.payload, b"event");
    }
}
