use std::fmt;

/// Error type for direction-engine operations.
///
/// Node and interpreter evaluation faults are deliberately *not* represented
/// here: those are isolated at the evaluation site (zero output / pass-through
/// plus a log line) and must never abort a tick or frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// An assignment referenced a capability the fixture group lacks, or a
    /// declared band had no eligible group. Surfaced at assignment time.
    Config(String),
    /// A sink kept rejecting writes past the retry budget. Fatal for the
    /// session: silent dark fixtures are worse than a loud stop.
    SinkExhausted { sink: &'static str, attempts: u32, last_error: String },
    /// A control command referenced an unknown theme or venue.
    UnknownResource { kind: &'static str, id: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EngineError::SinkExhausted {
                sink,
                attempts,
                last_error,
            } => write!(
                f,
                "{} sink failed after {} attempts: {}",
                sink, attempts, last_error
            ),
            EngineError::UnknownResource { kind, id } => {
                write!(f, "Unknown {}: {}", kind, id)
            }
        }
    }
}

impl std::error::Error for EngineError {}
