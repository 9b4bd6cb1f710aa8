//! Solver-context layer for route-map synthesis.
//!
//! Wraps Z3 with sort-tagged symbolic values that carry an optional
//! concrete payload, so the policy layer above can partially evaluate in
//! the host and only emit constraints for genuine uncertainty. Finite
//! attribute domains (prefixes, peers, next hops, ...) are encoded as
//! interned member indices over `Int`, bounded at solve-preparation time.

pub mod context;
pub mod value;

pub use context::{FiniteDomain, SolverContext};
pub use value::{ConcreteValue, EqOutcome, SmtVar, Sort};

use thiserror::Error;

/// Solver-layer error.
#[derive(Debug, Error)]
pub enum SmtError {
    #[error("sort mismatch: expected {expected}, found {found}")]
    SortMismatch { expected: Sort, found: Sort },

    #[error("concrete value {value} does not fit sort {sort}")]
    ValueSortMismatch { value: ConcreteValue, sort: Sort },

    #[error("unknown enum domain '{0}'")]
    UnknownDomain(String),

    #[error("enum domain '{0}' is already registered")]
    DuplicateDomain(String),

    #[error("'{member}' is not a member of enum domain '{domain}'")]
    UnknownMember { domain: String, member: String },

    #[error("no model bound: solve before reading values back")]
    NotSolved,

    #[error("model has no assignment for '{0}'")]
    NoAssignment(String),
}

pub type SmtResult<T> = Result<T, SmtError>;
