use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use gsl_acdb::AcdbQuery;
use gsl_gpr::{GprTransport, SpfSink};
use gsl_types::{KeyVector, TagId};
use gsl_wire::DataOpcode;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::{GraphError, GraphResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// Per-endpoint configuration: ring geometry plus the tag ACDB resolves to
/// a module-instance-id.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub tag: TagId,
    pub tkv: KeyVector,
    pub buffer_count: usize,
    pub buffer_size: usize,
}

struct RingBuffer {
    data: Vec<u8>,
    filled: usize,
    in_flight: bool,
}

struct State {
    miid: Option<u32>,
    ring: Vec<RingBuffer>,
    next_free: VecDeque<usize>,
    processed: u64,
    in_flight_count: usize,
    closing: bool,
}

/// A read or write shared-memory ring against one DSP endpoint module.
pub struct DataEndpoint {
    direction: Direction,
    src_port: u32,
    dst_port: u32,
    timeout: Duration,
    acdb: Arc<dyn AcdbQuery>,
    transport: Arc<GprTransport>,
    sink: Arc<dyn SpfSink>,
    state: Mutex<State>,
    drained: Condvar,
}

impl DataEndpoint {
    pub fn new(
        direction: Direction,
        src_port: u32,
        dst_port: u32,
        timeout: Duration,
        acdb: Arc<dyn AcdbQuery>,
        transport: Arc<GprTransport>,
        sink: Arc<dyn SpfSink>,
    ) -> Self {
        Self {
            direction,
            src_port,
            dst_port,
            timeout,
            acdb,
            transport,
            sink,
            state: Mutex::new(State {
                miid: None,
                ring: Vec::new(),
                next_free: VecDeque::new(),
                processed: 0,
                in_flight_count: 0,
                closing: false,
            }),
            drained: Condvar::new(),
        }
    }

    /// Allocates the ring and resolves the endpoint module-instance-id by
    /// looking the client-supplied tag up in ACDB.
    pub fn configure(&self, cfg: &EndpointConfig) -> GraphResult<()> {
        let modules = self.acdb.get_tagged_modules(cfg.tag)?;
        let miid = modules.first().map(|m| m.0);

        let mut state = self.state.lock();
        state.miid = miid;
        state.ring = (0..cfg.buffer_count)
            .map(|_| RingBuffer {
                data: vec![0u8; cfg.buffer_size],
                filled: 0,
                in_flight: false,
            })
            .collect();
        state.next_free = (0..cfg.buffer_count).collect();
        state.closing = false;
        debug!(
            "datapath[{:?}]: configured {} buffers of {} bytes, miid={:?}",
            self.direction, cfg.buffer_count, cfg.buffer_size, state.miid
        );
        Ok(())
    }

    /// Queues every ring buffer to SPF; called when the owning graph starts
    /// a read endpoint.
    pub fn queue_all_for_read(&self) -> GraphResult<()> {
        let mut state = self.state.lock();
        let indices: Vec<usize> = (0..state.ring.len()).collect();
        for idx in indices {
            state.ring[idx].in_flight = true;
            state.in_flight_count += 1;
            self.send_buffer(idx)?;
        }
        Ok(())
    }

    fn send_buffer(&self, idx: usize) -> GraphResult<()> {
        let opcode = match self.direction {
            Direction::Write => DataOpcode::WrSharedMemEpDataBuffer,
            Direction::Read => DataOpcode::RdSharedMemEpDataBuffer,
        };
        let payload = (idx as u32).to_le_bytes().to_vec();
        let packet = self
            .transport
            .allocate_packet(opcode as u32, self.src_port, self.dst_port, payload);
        self.transport.send_cmd(self.sink.as_ref(), packet, self.timeout)?;
        Ok(())
    }

    /// Copies `bytes` into the next free buffer and sends
    /// `DATA_CMD_WR_SH_MEM_EP_DATA_BUFFER_V2`. Blocks if no buffer is free.
    pub fn write(&self, bytes: &[u8]) -> GraphResult<usize> {
        if self.direction != Direction::Write {
            return Err(GraphError::Core(gsl_types::GslError::BadInput(
                "write() called on a read endpoint",
            )));
        }
        let idx = {
            let mut state = self.state.lock();
            loop {
                if state.closing {
                    return Err(GraphError::Core(gsl_types::GslError::Ssr));
                }
                if let Some(idx) = state.next_free.pop_front() {
                    break idx;
                }
                self.drained.wait(&mut state);
            }
        };

        let consumed = {
            let mut state = self.state.lock();
            let buf = &mut state.ring[idx];
            let n = bytes.len().min(buf.data.len());
            buf.data[..n].copy_from_slice(&bytes[..n]);
            buf.filled = n;
            buf.in_flight = true;
            state.in_flight_count += 1;
            n
        };
        self.send_buffer(idx)?;
        Ok(consumed)
    }

    /// Marks buffer `idx` done: for a write, frees it back to the pool; for
    /// a read, increments the filled count so a consumer can drain it.
    pub fn on_buffer_done(&self, idx: usize) {
        let mut state = self.state.lock();
        if idx >= state.ring.len() {
            return;
        }
        state.ring[idx].in_flight = false;
        state.in_flight_count = state.in_flight_count.saturating_sub(1);
        state.processed += 1;
        match self.direction {
            Direction::Write => state.next_free.push_back(idx),
            Direction::Read => {}
        }
        self.drained.notify_all();
    }

    /// Reads out the next filled read buffer, re-queuing it to SPF. Blocks
    /// until a buffer is filled or the endpoint is closing.
    pub fn read(&self, out: &mut [u8]) -> GraphResult<usize> {
        if self.direction != Direction::Read {
            return Err(GraphError::Core(gsl_types::GslError::BadInput(
                "read() called on a write endpoint",
            )));
        }
        let (idx, n) = {
            let mut state = self.state.lock();
            loop {
                if state.closing {
                    return Err(GraphError::Core(gsl_types::GslError::Ssr));
                }
                if let Some(idx) = state
                    .ring
                    .iter()
                    .position(|b| !b.in_flight && b.filled > 0)
                {
                    let buf = &mut state.ring[idx];
                    let n = buf.filled.min(out.len());
                    out[..n].copy_from_slice(&buf.data[..n]);
                    buf.filled = 0;
                    buf.in_flight = true;
                    state.in_flight_count += 1;
                    break (idx, n);
                }
                self.drained.wait(&mut state);
            }
        };
        self.send_buffer(idx)?;
        Ok(n)
    }

    /// Wakes every blocked reader/writer with the close condition and waits
    /// for in-flight buffers to drain.
    pub fn quiesce(&self, drain_timeout: Duration) {
        let mut state = self.state.lock();
        state.closing = true;
        self.drained.notify_all();
        let deadline = std::time::Instant::now() + drain_timeout;
        while state.in_flight_count > 0 && std::time::Instant::now() < deadline {
            self.drained.wait_for(&mut state, Duration::from_millis(5));
        }
    }

    pub fn processed_count(&self) -> u64 {
        self.state.lock().processed
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}
