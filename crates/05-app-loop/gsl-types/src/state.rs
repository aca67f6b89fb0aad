/// State of one graph instance. `Error` folds the driver's two error states
/// (plain error vs. error-but-cleanup-allowed) into a single variant carrying
/// the distinction as a flag, since every transition out of either one is
/// identical except for whether `close` is permitted without first calling
/// `stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GraphState {
    #[default]
    Idle,
    Opened,
    Started,
    Stopped,
    Error { allow_cleanup: bool },
}

impl GraphState {
    pub fn is_error(&self) -> bool {
        matches!(self, GraphState::Error { .. })
    }

    /// Whether `close` may run directly from this state without an
    /// intervening `stop`.
    pub fn can_close_without_stop(&self) -> bool {
        match self {
            GraphState::Idle | GraphState::Opened | GraphState::Stopped => true,
            GraphState::Error { allow_cleanup } => *allow_cleanup,
            GraphState::Started => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_allow_cleanup_permits_close() {
        let s = GraphState::Error {
            allow_cleanup: true,
        };
        assert!(s.can_close_without_stop());

        let s = GraphState::Error {
            allow_cleanup: false,
        };
        assert!(!s.can_close_without_stop());
    }

    #[test]
    fn started_requires_stop_before_close() {
        assert!(!GraphState::Started.can_close_without_stop());
    }
}
