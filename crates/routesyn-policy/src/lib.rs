//! Route-map policy semantics encoded as solver constraints.
//!
//! Match predicates and attribute-setting actions over BGP announcements
//! are turned into constraints on symbolic values, for a solver that
//! synthesizes or verifies router policies. The enumerative combinators
//! ([`SelectOne`](matches::SelectOne), [`SetOne`](actions::SetOne)) expose
//! an unknown choice among candidates through a ranged index variable —
//! the solver's assignment to that index is the synthesized policy
//! structure.
//!
//! Everything partially evaluates: when an outcome is decidable in the
//! host from concrete inputs, no solver variable is allocated and no
//! constraint is registered.

pub mod actions;
pub mod announcements;
pub mod factory;
pub mod matches;
pub mod route_map;

#[cfg(test)]
pub(crate) mod testutil;

pub use actions::{Action, SetAttribute, SetCommunity, SetOne};
pub use announcements::{Announcement, AnnouncementSet, Attr, Community, Field};
pub use factory::{action_for_field, match_for_field};
pub use matches::{
    Match, MatchAll, MatchAnd, MatchAttribute, MatchCommunity, MatchNone, MatchOr, SelectOne,
};
pub use route_map::{build_match_clause, MatchClause};

use routesyn_smt::SmtError;
use thiserror::Error;

/// Policy-layer error. Contract violations are detected eagerly at
/// construction time; there is no recovery inside this layer.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Smt(#[from] SmtError),

    #[error("cannot build over an empty announcement set")]
    EmptyAnnouncements,

    #[error("announcement sets are fixed-length: old has {old} lanes, new has {new}")]
    LaneCountMismatch { old: usize, new: usize },

    #[error("announcement index {index} out of range (set has {len} lanes)")]
    LaneOutOfRange { index: usize, len: usize },

    #[error("community '{0}' is not present in the announcements")]
    UnknownCommunity(Community),

    #[error("unrecognized attribute '{0}'")]
    UnrecognizedAttribute(String),

    #[error("select-one/set-one needs at least one candidate")]
    NoCandidates,

    #[error("all candidate actions must share the same guard match")]
    GuardMismatch,

    #[error("all candidate actions must share the same input announcements")]
    AnnouncementsMismatch,

    #[error("solved index {0} does not name a candidate")]
    IndexOutOfRange(i64),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
