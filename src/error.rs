//! Error taxonomy for the academic period and promotion core.
//!
//! | Category | Variants | Raised |
//! |----------|----------|--------|
//! | Validation | `Validation`, `NotFound`, `SelfPromotion`, `ReverseRule`, `YearInactive` | before any transaction opens |
//! | Precondition | `SwitchTermFirst`, `AlreadyPromoted`, `UndoRejected` | read-only checks before the mutating transaction |
//! | Cache miss | `YearNotSet`, `TermNotSet` | expected on a fresh workspace |
//! | Store | `Store`, `PoolTimeout` | rolled back, reported as an opaque failure |

use std::time::Duration;

pub type Result<T> = std::result::Result<T, SchoolError>;

#[derive(Debug, thiserror::Error)]
pub enum SchoolError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("active academic year is not set")]
    YearNotSet,

    #[error("active term is not set")]
    TermNotSet,

    #[error("academic year {year_id} is not active")]
    YearInactive { year_id: String },

    #[error("a class cannot be promoted into itself")]
    SelfPromotion,

    #[error("the reverse of an existing promotion rule is not allowed")]
    ReverseRule,

    #[error("switch to the new academic term first to promote students")]
    SwitchTermFirst,

    #[error("promotion event already done")]
    AlreadyPromoted,

    #[error("undo operation rejected: {0}")]
    UndoRejected(String),

    #[error("no database connection became free within {0:?}")]
    PoolTimeout(Duration),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl SchoolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable code reported to IPC clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::NotFound { .. } => "not_found",
            Self::YearNotSet => "year_not_set",
            Self::TermNotSet => "term_not_set",
            Self::YearInactive { .. } => "year_inactive",
            Self::SelfPromotion => "self_promotion",
            Self::ReverseRule => "reverse_rule",
            Self::SwitchTermFirst => "switch-term-first",
            Self::AlreadyPromoted => "already-promoted",
            Self::UndoRejected(_) => "undo-rejected",
            Self::PoolTimeout(_) | Self::Store(_) => "failed",
        }
    }

    /// Store and pool failures; their details stay in the logs.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::PoolTimeout(_) | Self::Store(_))
    }
}
