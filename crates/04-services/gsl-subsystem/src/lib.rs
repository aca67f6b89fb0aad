//! Subsystem-state tracker: an authoritative processor-id -> {UP, DOWN} map
//! with fan-out notification on change.
//!
//! Reads (`get`/`is_supported`) are wait-free via [`arc_swap::ArcSwap`] over
//! an immutable per-master bitmask snapshot; writes (`set`) take a
//! short-lived lock only to run the compare-and-swap loop and invoke
//! callbacks, since registration is rare and reads are hot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use log::{debug, warn};
use parking_lot::Mutex;

/// The seven processor bits the tracker records, per the master processor
/// bitmask convention carried throughout the SPF wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Proc {
    Mdsp = 1 << 0,
    Adsp = 1 << 1,
    Apps = 1 << 2,
    Sdsp = 1 << 3,
    Cdsp = 1 << 4,
    CcDsp = 1 << 5,
    Apps2 = 1 << 6,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct MaskSnapshot {
    up: u32,
}

type Callback = Box<dyn Fn(u32, u32) + Send + Sync>;

/// Tracks UP/DOWN state for every processor under one master processor id.
pub struct SubsystemTracker {
    master: u32,
    state: ArcSwap<MaskSnapshot>,
    callbacks: Mutex<Vec<Callback>>,
}

impl SubsystemTracker {
    pub fn new(master: u32) -> Self {
        Self {
            master,
            state: ArcSwap::from_pointee(MaskSnapshot::default()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn master(&self) -> u32 {
        self.master
    }

    /// Registers a callback invoked as `(ss_mask, previous_ss_mask)`
    /// whenever [`Self::set`] changes the mask.
    pub fn on_change(&self, callback: impl Fn(u32, u32) + Send + Sync + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Marks the processors in `ss_mask` as UP (`up = true`) or DOWN.
    pub fn set(&self, ss_mask: u32, up: bool) {
        let previous = self.state.load();
        let new_mask = if up {
            previous.up | ss_mask
        } else {
            previous.up & !ss_mask
        };
        if new_mask == previous.up {
            return;
        }
        self.state.store(Arc::new(MaskSnapshot { up: new_mask }));
        debug!(
            "subsystem[{:#x}]: mask {:#x} -> {:#x} ({})",
            self.master,
            previous.up,
            new_mask,
            if up { "up" } else { "down" }
        );
        if !up {
            warn!(
                "subsystem[{:#x}]: subsystems {:#x} went down",
                self.master, ss_mask
            );
        }
        for callback in self.callbacks.lock().iter() {
            callback(new_mask, previous.up);
        }
    }

    pub fn get(&self) -> u32 {
        self.state.load().up
    }

    pub fn is_supported(&self, proc: Proc) -> bool {
        self.get() & (proc as u32) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_updates_mask_and_is_supported() {
        let tracker = SubsystemTracker::new(0x1);
        assert!(!tracker.is_supported(Proc::Adsp));

        tracker.set(Proc::Adsp as u32, true);
        assert!(tracker.is_supported(Proc::Adsp));

        tracker.set(Proc::Adsp as u32, false);
        assert!(!tracker.is_supported(Proc::Adsp));
    }

    #[test]
    fn callback_fires_on_change_only() {
        let tracker = SubsystemTracker::new(0x1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        tracker.on_change(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        tracker.set(Proc::Adsp as u32, true);
        tracker.set(Proc::Adsp as u32, true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
