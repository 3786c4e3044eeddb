use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The candidate stay overlaps an ACCEPTED booking; carries the
    /// blocking booking's id so the caller can show what's in the way.
    Conflict(Ulid),
    CapacityExceeded {
        requested: u32,
        max_guests: u32,
    },
    /// Actor lacks the rights for this operation.
    Forbidden(&'static str),
    /// Transition attempted on a booking already in a terminal state.
    InvalidState {
        id: Ulid,
        status: BookingStatus,
    },
    /// Semantically invalid date range or guest count (parseable input,
    /// inadmissible values).
    InvalidStay(&'static str),
    /// Malformed non-date field: empty title, email without '@', etc.
    InvalidArgument(&'static str),
    /// Property cannot be delisted while an ACCEPTED booking exists;
    /// carries the first blocking booking's id.
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "dates conflict with accepted booking: {id}")
            }
            EngineError::CapacityExceeded {
                requested,
                max_guests,
            } => {
                write!(f, "{requested} guests exceeds property capacity {max_guests}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidState { id, status } => {
                write!(f, "booking {id} is {}: no further transition", status.as_str())
            }
            EngineError::InvalidStay(msg) => write!(f, "invalid stay: {msg}"),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delist: accepted booking {id} exists")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
