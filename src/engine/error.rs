use ulid::Ulid;

/// Local, recoverable outcomes of reservation operations. Callers map these
/// to their own surface (404/409/400); periodic jobs treat `Store` as a
/// contained cycle failure, never process-fatal.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// Interval overlap, or a concurrent transition won the race.
    Conflict(Ulid),
    NotAllowed(&'static str),
    Validation(&'static str),
    /// A periodic job's lease expired mid-cycle; the cycle was aborted.
    LockLost,
    Store(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::NotAllowed(msg) => write!(f, "not allowed: {msg}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LockLost => write!(f, "lock lease lost mid-cycle"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
