//! Field-driven construction of matches and actions.
//!
//! One `match` over the closed [`Field`] enumeration replaces any
//! string-keyed constructor lookup: a fixed attribute dispatches to the
//! generic attribute variant, a community tag to the community variant.
//! Unrecognized textual names are rejected earlier, at the
//! `Attr::from_str` boundary.

use std::rc::Rc;

use routesyn_smt::{SmtVar, SolverContext};

use crate::actions::{Action, SetAttribute, SetCommunity};
use crate::announcements::{AnnouncementSet, Field};
use crate::matches::{Match, MatchAttribute, MatchCommunity};
use crate::PolicyResult;

/// The match variant for a field. `value = None` keeps the target open
/// (attribute: fresh var of the attribute's sort; community: concrete
/// `true`).
pub fn match_for_field(
    field: &Field,
    value: Option<SmtVar>,
    anns: &Rc<AnnouncementSet>,
    ctx: &Rc<SolverContext>,
) -> PolicyResult<Rc<dyn Match>> {
    match field {
        Field::Attr(attr) => Ok(Rc::new(MatchAttribute::new(*attr, value, anns, ctx)?)),
        Field::Community(tag) => Ok(Rc::new(MatchCommunity::new(tag.clone(), value, anns, ctx)?)),
    }
}

/// The action variant for a field, guarded by `guard`.
pub fn action_for_field(
    field: &Field,
    guard: Rc<dyn Match>,
    value: Option<SmtVar>,
    anns: &Rc<AnnouncementSet>,
    ctx: &Rc<SolverContext>,
) -> PolicyResult<Rc<dyn Action>> {
    match field {
        Field::Attr(attr) => {
            let action: Rc<dyn Action> = SetAttribute::new(guard, *attr, value, anns, ctx)?;
            Ok(action)
        }
        Field::Community(tag) => {
            let action: Rc<dyn Action> = SetCommunity::new(guard, tag.clone(), value, anns, ctx)?;
            Ok(action)
        }
    }
}
