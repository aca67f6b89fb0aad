use std::sync::{Arc, Weak};

use gsl_gpr::{GprPacket, GprResult, GprTransport, SpfSink, BASIC_RSP_OPCODE};
use gsl_wire::{ApmOpcode, DataOpcode};
use log::debug;
use parking_lot::Mutex;

/// An in-memory stand-in for SPF: consumes GPR packets by opcode and
/// synthesizes the basic-ack reply every command in this workspace expects,
/// recording every opcode it saw so tests can assert exact SPF traffic.
pub struct MockSpf {
    transport: Weak<GprTransport>,
    log: Mutex<Vec<u32>>,
}

impl MockSpf {
    pub fn new(transport: &Arc<GprTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::downgrade(transport),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn opcode_log(&self) -> Vec<u32> {
        self.log.lock().clone()
    }

    pub fn count(&self, opcode: ApmOpcode) -> usize {
        self.log.lock().iter().filter(|&&op| op == opcode as u32).count()
    }
}

impl SpfSink for MockSpf {
    fn send(&self, packet: GprPacket) -> GprResult<()> {
        self.log.lock().push(packet.opcode);
        if let Some(op) = ApmOpcode::from_u32(packet.opcode) {
            debug!("mock-spf: received {:?}", op);
        } else if let Some(op) = DataOpcode::from_u32(packet.opcode) {
            debug!("mock-spf: received {:?}", op);
        }

        let transport = self.transport.upgrade().expect("transport still alive");
        let reply = GprPacket {
            opcode: BASIC_RSP_OPCODE,
            src_port: packet.dst_port,
            dst_port: packet.src_port,
            token: packet.token,
            payload: Vec::new(),
        };
        transport.dispatch_incoming(reply);
        Ok(())
    }
}
