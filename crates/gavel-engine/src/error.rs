use crate::{
    model::{
        AuctionId,
        LotId,
        Money,
        TeamId,
    },
    repository::RepositoryError,
};

/// The stable error kinds surfaced by the engine.
///
/// Callers translate these into their own presentation (HTTP codes, localized
/// messages); the engine never maps them itself and never silently recovers
/// from validation, not-found, state, or bid errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input failed validation: {reason}")]
    InvalidInput { reason: String },

    #[error("auction `{id}` not found")]
    AuctionNotFound { id: AuctionId },

    #[error("lot `{id}` not found")]
    LotNotFound { id: LotId },

    #[error("team `{id}` not found in this auction's season")]
    TeamNotFound { id: TeamId },

    #[error("operation `{operation}` is not legal while the auction is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("the auction is not running")]
    AuctionNotRunning,

    #[error("the lot is not the active lot")]
    LotNotActive,

    #[error("the lot deadline has passed")]
    LotClosed,

    #[error("bid is below the minimum increment; the next bid must be at least {min_next}")]
    BelowIncrement { min_next: Money },

    #[error("bid exceeds the team budget; {remaining} remaining")]
    InsufficientBudget { remaining: Money },

    #[error("the team squad is full")]
    SquadFull,

    #[error("acquiring this player would break roster composition rules: {reason}")]
    RosterConstraint { reason: &'static str },

    #[error("the team is already the highest bidder on this lot")]
    AlreadyLeading,

    #[error("serialized write conflicted and the retry bound was exhausted")]
    Conflict,

    #[error(
        "subscriber lagged too far behind and was dropped; resume from sequence {last_delivered}"
    )]
    SlowConsumer { last_delivered: u64 },

    #[error("the engine or its persistence layer is unavailable")]
    Unavailable {
        #[source]
        source: Option<RepositoryError>,
    },
}

impl Error {
    pub(crate) fn invalid_state(
        operation: &'static str,
        state: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self::Unavailable {
            source: None,
        }
    }
}

impl From<RepositoryError> for Error {
    fn from(source: RepositoryError) -> Self {
        match source {
            RepositoryError::SequenceConflict {
                ..
            } => Self::Conflict,
            other => Self::Unavailable {
                source: Some(other),
            },
        }
    }
}
