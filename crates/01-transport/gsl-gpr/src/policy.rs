//! Submission policy for a transport port.

/// How a port behaves when its backing ring/mailbox is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Caller must not drop; backpressure via `WouldBlock`.
    Must,
    /// Only the newest message is retained (mailbox backend).
    Coalesce,
    /// Old messages may be dropped to keep submission non-blocking.
    BestEffort,
    /// Same as `Must`; used for command rings that can never silently drop.
    Lossless,
}
