//! Translation of concrete route-map match clauses into match trees.
//!
//! A clause value of `None` is a wildcard: for enumerable attributes the
//! whole finite domain is enumerated under a [`SelectOne`], so the solver
//! picks which concrete value the clause pins — leaving nothing
//! unconstrained.

use std::rc::Rc;

use routesyn_smt::{ConcreteValue, SolverContext, Sort};
use tracing::debug;

use crate::announcements::{AnnouncementSet, Attr, Community};
use crate::matches::{Match, MatchAnd, MatchAttribute, MatchCommunity, SelectOne};
use crate::PolicyResult;

/// One parsed match clause of a route-map entry. `None` marks a wildcard
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchClause {
    NextHop(Option<String>),
    LocalPref(Option<i64>),
    Peer(Option<String>),
    /// Per-network prefix list; a `None` entry matches any known prefix.
    PrefixList(Vec<Option<String>>),
    /// Per-tag community list; a `None` entry matches any known tag.
    CommunityList(Vec<Option<Community>>),
}

/// Build the match tree for one clause.
pub fn build_match_clause(
    clause: &MatchClause,
    anns: &Rc<AnnouncementSet>,
    ctx: &Rc<SolverContext>,
) -> PolicyResult<Rc<dyn Match>> {
    debug!(?clause, "translating match clause");
    match clause {
        MatchClause::NextHop(value) => enum_attr_match(Attr::NextHop, value.as_deref(), anns, ctx),
        MatchClause::Peer(value) => enum_attr_match(Attr::Peer, value.as_deref(), anns, ctx),
        MatchClause::LocalPref(Some(pref)) => {
            let target = ctx.create_fresh_var(
                Sort::Int,
                "local_pref_clause_",
                Some(ConcreteValue::Int(*pref)),
            )?;
            Ok(Rc::new(MatchAttribute::new(
                Attr::LocalPref,
                Some(target),
                anns,
                ctx,
            )?))
        }
        // local_pref has no finite domain to enumerate; the target stays a
        // free variable.
        MatchClause::LocalPref(None) => Ok(Rc::new(MatchAttribute::new(
            Attr::LocalPref,
            None,
            anns,
            ctx,
        )?)),
        MatchClause::PrefixList(networks) => {
            let mut parts: Vec<Rc<dyn Match>> = Vec::with_capacity(networks.len());
            for network in networks {
                parts.push(prefix_match(network.as_deref(), anns, ctx)?);
            }
            Ok(Rc::new(MatchAnd::new(parts, ctx)?))
        }
        MatchClause::CommunityList(tags) => {
            let mut parts: Vec<Rc<dyn Match>> = Vec::with_capacity(tags.len());
            for tag in tags {
                parts.push(community_match(tag.as_ref(), anns, ctx)?);
            }
            Ok(Rc::new(MatchAnd::new(parts, ctx)?))
        }
    }
}

/// An enum-sorted attribute clause: pinned when concrete (the value is
/// injected into the domain if new), otherwise a `SelectOne` over every
/// value in the domain.
fn enum_attr_match(
    attr: Attr,
    value: Option<&str>,
    anns: &Rc<AnnouncementSet>,
    ctx: &Rc<SolverContext>,
) -> PolicyResult<Rc<dyn Match>> {
    let domain = ctx.get_enum_type(attr.domain().expect("enum-sorted attribute"))?;
    match value {
        Some(member) => {
            let target = domain.insert(member);
            Ok(Rc::new(MatchAttribute::new(attr, Some(target), anns, ctx)?))
        }
        None => {
            let mut candidates: Vec<Rc<dyn Match>> = Vec::with_capacity(domain.len());
            for target in domain.symbolic_values() {
                candidates.push(Rc::new(MatchAttribute::new(attr, Some(target), anns, ctx)?));
            }
            Ok(Rc::new(SelectOne::new(candidates, ctx)?))
        }
    }
}

fn prefix_match(
    network: Option<&str>,
    anns: &Rc<AnnouncementSet>,
    ctx: &Rc<SolverContext>,
) -> PolicyResult<Rc<dyn Match>> {
    enum_attr_match(Attr::Prefix, network, anns, ctx)
}

/// A community-list entry: the tag must be set when named, otherwise a
/// `SelectOne` over every community known to the context.
fn community_match(
    tag: Option<&Community>,
    anns: &Rc<AnnouncementSet>,
    ctx: &Rc<SolverContext>,
) -> PolicyResult<Rc<dyn Match>> {
    match tag {
        Some(tag) => Ok(Rc::new(MatchCommunity::new(tag.clone(), None, anns, ctx)?)),
        None => {
            let mut candidates: Vec<Rc<dyn Match>> = Vec::new();
            for tag in ctx.communities() {
                candidates.push(Rc::new(MatchCommunity::new(
                    Community::new(tag),
                    None,
                    anns,
                    ctx,
                )?));
            }
            Ok(Rc::new(SelectOne::new(candidates, ctx)?))
        }
    }
}
