//! Blocking wait/notify primitive used to correlate a command with its reply.
//!
//! A `Signal` is allocated per outstanding command. The issuing thread calls
//! [`Signal::wait`] or [`Signal::timedwait`] and parks until a matching
//! [`Signal::set`] call wakes it, carrying the flags that caused the wakeup,
//! the completion status, and an optional reply packet. Every `set` call
//! checks its token against the last token the signal was armed with
//! (`Signal::arm`); a reply for a stale/duplicate token is silently dropped,
//! matching how a late SPF response after a timeout must not be delivered to
//! a waiter that already moved on.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Bits describing why a waiter was woken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalFlags(u32);

impl SignalFlags {
    pub const NONE: SignalFlags = SignalFlags(0);
    pub const SPF_RSP: SignalFlags = SignalFlags(1 << 0);
    pub const CLOSE: SignalFlags = SignalFlags(1 << 1);
    pub const SSR: SignalFlags = SignalFlags(1 << 2);
    pub const TIMEOUT: SignalFlags = SignalFlags(1 << 3);

    pub const fn contains(self, other: SignalFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: SignalFlags) -> SignalFlags {
        SignalFlags(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SignalFlags {
    type Output = SignalFlags;
    fn bitor(self, rhs: SignalFlags) -> SignalFlags {
        self.union(rhs)
    }
}

/// Completion status carried by a signal wakeup.
pub type SignalStatus = Result<(), u32>;

/// Opaque reply payload a waiter receives alongside the wakeup flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalPacket(pub Vec<u8>);

/// Outcome of a `wait`/`timedwait` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalOutcome {
    pub flags: SignalFlags,
    pub status: SignalStatus,
    pub packet: Option<SignalPacket>,
}

struct State {
    flags: SignalFlags,
    status: SignalStatus,
    packet: Option<SignalPacket>,
    token: u64,
    armed: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            flags: SignalFlags::NONE,
            status: Ok(()),
            packet: None,
            token: 0,
            armed: false,
        }
    }
}

/// Condition-variable-backed wait/notify pair guarding a bitfield of flags.
pub struct Signal {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            condvar: Condvar::new(),
        }
    }

    /// Arms the signal with the token a forthcoming `set` call must match.
    /// Must be called before issuing the command the signal waits on.
    pub fn arm(&self, token: u64) {
        let mut state = self.state.lock();
        state.token = token;
        state.armed = true;
        state.flags = SignalFlags::NONE;
        state.status = Ok(());
        state.packet = None;
    }

    /// Wakes any waiter, delivering `flags`/`status`/`packet`. A reply whose
    /// `token` does not match the last `arm` call is dropped as stale.
    pub fn set(
        &self,
        token: u64,
        flags: SignalFlags,
        status: SignalStatus,
        packet: Option<SignalPacket>,
    ) {
        let mut state = self.state.lock();
        if !state.armed || state.token != token {
            return;
        }
        state.flags = state.flags.union(flags);
        state.status = status;
        state.packet = packet;
        state.armed = false;
        self.condvar.notify_all();
    }

    /// Blocks until a matching `set` call wakes the signal.
    pub fn wait(&self) -> SignalOutcome {
        let mut state = self.state.lock();
        while state.armed {
            self.condvar.wait(&mut state);
        }
        SignalOutcome {
            flags: state.flags,
            status: state.status,
            packet: state.packet.clone(),
        }
    }

    /// Blocks until woken or `dur` elapses, in which case the outcome carries
    /// [`SignalFlags::TIMEOUT`] and the signal is disarmed so a subsequent
    /// late reply for the same token is dropped by `set`.
    pub fn timedwait(&self, dur: Duration) -> SignalOutcome {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + dur;
        while state.armed {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                state.flags = state.flags.union(SignalFlags::TIMEOUT);
                state.armed = false;
                break;
            }
            let result = self.condvar.wait_for(&mut state, remaining);
            if state.armed && result.timed_out() {
                state.flags = state.flags.union(SignalFlags::TIMEOUT);
                state.armed = false;
                break;
            }
        }
        SignalOutcome {
            flags: state.flags,
            status: state.status,
            packet: state.packet.clone(),
        }
    }

    /// Clears the given flags, leaving status/packet untouched.
    pub fn clear(&self, mask: SignalFlags) {
        let mut state = self.state.lock();
        state.flags = SignalFlags(state.flags.0 & !mask.0);
    }
}
