//! Match predicates over announcement lanes, with per-lane memoization.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use routesyn_smt::{ConcreteValue, EqOutcome, SmtError, SmtVar, SolverContext, Sort};
use z3::ast::{Bool, Int};

use crate::announcements::{AnnouncementSet, Attr, Community, Field};
use crate::factory::match_for_field;
use crate::{PolicyError, PolicyResult};

/// A predicate over a single announcement lane.
///
/// `is_match` returns a boolean-sorted symbolic value and memoizes per
/// lane: the same (node, lane) query always returns the identical value
/// and registers no second constraint. First evaluation may register
/// constraints as a side effect — never when the result folds to a
/// concrete boolean.
pub trait Match {
    fn is_match(&self, lane: usize) -> PolicyResult<SmtVar>;
}

type LaneCache = RefCell<HashMap<usize, SmtVar>>;

fn cached(cache: &LaneCache, lane: usize) -> Option<SmtVar> {
    cache.borrow().get(&lane).cloned()
}

fn concrete_bool(var: &SmtVar) -> bool {
    matches!(var.value(), Some(ConcreteValue::Bool(true)))
}

/// Matches every announcement.
pub struct MatchAll {
    var: SmtVar,
}

impl MatchAll {
    pub fn new(ctx: &Rc<SolverContext>) -> PolicyResult<Self> {
        let var = ctx.create_fresh_var(Sort::Bool, "match_all_", Some(ConcreteValue::Bool(true)))?;
        Ok(Self { var })
    }
}

impl Match for MatchAll {
    fn is_match(&self, _lane: usize) -> PolicyResult<SmtVar> {
        Ok(self.var.clone())
    }
}

/// Matches no announcement.
pub struct MatchNone {
    var: SmtVar,
}

impl MatchNone {
    pub fn new(ctx: &Rc<SolverContext>) -> PolicyResult<Self> {
        let var =
            ctx.create_fresh_var(Sort::Bool, "match_none_", Some(ConcreteValue::Bool(false)))?;
        Ok(Self { var })
    }
}

impl Match for MatchNone {
    fn is_match(&self, _lane: usize) -> PolicyResult<SmtVar> {
        Ok(self.var.clone())
    }
}

/// Conjunction of sub-matches.
pub struct MatchAnd {
    matches: Vec<Rc<dyn Match>>,
    ctx: Rc<SolverContext>,
    cache: LaneCache,
}

impl MatchAnd {
    pub fn new(matches: Vec<Rc<dyn Match>>, ctx: &Rc<SolverContext>) -> PolicyResult<Self> {
        Ok(Self {
            matches,
            ctx: ctx.clone(),
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn matches(&self) -> &[Rc<dyn Match>] {
        &self.matches
    }
}

impl Match for MatchAnd {
    fn is_match(&self, lane: usize) -> PolicyResult<SmtVar> {
        if let Some(hit) = cached(&self.cache, lane) {
            return Ok(hit);
        }
        let results = self
            .matches
            .iter()
            .map(|m| m.is_match(lane))
            .collect::<PolicyResult<Vec<_>>>()?;
        let var = if results.iter().all(|r| r.is_concrete()) {
            let folded = results.iter().all(concrete_bool);
            self.ctx
                .create_fresh_var(Sort::Bool, "match_and_", Some(ConcreteValue::Bool(folded)))?
        } else {
            let var = self.ctx.create_fresh_var(Sort::Bool, "match_and_", None)?;
            let parts: Vec<Bool> = results.iter().map(|r| r.as_bool().unwrap()).collect();
            self.ctx
                .register_constraint(var.as_bool().unwrap().eq(&Bool::and(&parts)), "const_and_");
            var
        };
        self.cache.borrow_mut().insert(lane, var.clone());
        Ok(var)
    }
}

/// Disjunction of sub-matches.
pub struct MatchOr {
    matches: Vec<Rc<dyn Match>>,
    ctx: Rc<SolverContext>,
    cache: LaneCache,
}

impl MatchOr {
    pub fn new(matches: Vec<Rc<dyn Match>>, ctx: &Rc<SolverContext>) -> PolicyResult<Self> {
        Ok(Self {
            matches,
            ctx: ctx.clone(),
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn matches(&self) -> &[Rc<dyn Match>] {
        &self.matches
    }
}

impl Match for MatchOr {
    fn is_match(&self, lane: usize) -> PolicyResult<SmtVar> {
        if let Some(hit) = cached(&self.cache, lane) {
            return Ok(hit);
        }
        let results = self
            .matches
            .iter()
            .map(|m| m.is_match(lane))
            .collect::<PolicyResult<Vec<_>>>()?;
        let var = if results.iter().all(|r| r.is_concrete()) {
            let folded = results.iter().any(concrete_bool);
            self.ctx
                .create_fresh_var(Sort::Bool, "match_or_", Some(ConcreteValue::Bool(folded)))?
        } else {
            let var = self.ctx.create_fresh_var(Sort::Bool, "match_or_", None)?;
            let parts: Vec<Bool> = results.iter().map(|r| r.as_bool().unwrap()).collect();
            self.ctx
                .register_constraint(var.as_bool().unwrap().eq(&Bool::or(&parts)), "const_or_");
            var
        };
        self.cache.borrow_mut().insert(lane, var.clone());
        Ok(var)
    }
}

/// Equality of one announcement attribute against a target value.
pub struct MatchAttribute {
    attr: Attr,
    value: SmtVar,
    anns: Rc<AnnouncementSet>,
    ctx: Rc<SolverContext>,
    cache: LaneCache,
}

impl MatchAttribute {
    /// `value = None` leaves the target open: a fresh variable of the
    /// attribute's sort, for the solver to pick.
    pub fn new(
        attr: Attr,
        value: Option<SmtVar>,
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Self> {
        let attr_sort = anns.first().attr(attr).sort().clone();
        let value = match value {
            Some(v) => {
                if *v.sort() != attr_sort {
                    return Err(SmtError::SortMismatch {
                        expected: attr_sort,
                        found: v.sort().clone(),
                    }
                    .into());
                }
                v
            }
            None => ctx.create_fresh_var(attr_sort, &format!("match_{attr}_val_"), None)?,
        };
        Ok(Self {
            attr,
            value,
            anns: anns.clone(),
            ctx: ctx.clone(),
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn attr(&self) -> Attr {
        self.attr
    }

    /// The target value announcements are compared against.
    pub fn value(&self) -> &SmtVar {
        &self.value
    }
}

impl Match for MatchAttribute {
    fn is_match(&self, lane: usize) -> PolicyResult<SmtVar> {
        if let Some(hit) = cached(&self.cache, lane) {
            return Ok(hit);
        }
        let ann = self.anns.get(lane).ok_or(PolicyError::LaneOutOfRange {
            index: lane,
            len: self.anns.len(),
        })?;
        let attr = self.attr;
        let var = match ann.attr(attr).check_eq(&self.value)? {
            EqOutcome::Concrete(b) => self.ctx.create_fresh_var(
                Sort::Bool,
                &format!("match_{attr}_"),
                Some(ConcreteValue::Bool(b)),
            )?,
            EqOutcome::Symbolic(eq) => {
                let var = self
                    .ctx
                    .create_fresh_var(Sort::Bool, &format!("match_{attr}_"), None)?;
                self.ctx
                    .register_constraint(var.as_bool().unwrap().eq(&eq), &format!("const_match_{attr}_"));
                var
            }
        };
        self.cache.borrow_mut().insert(lane, var.clone());
        Ok(var)
    }
}

/// Equality of one community membership flag against a target boolean
/// (by default concrete `true`: the tag must be set).
pub struct MatchCommunity {
    community: Community,
    value: SmtVar,
    anns: Rc<AnnouncementSet>,
    ctx: Rc<SolverContext>,
    cache: LaneCache,
}

impl MatchCommunity {
    pub fn new(
        community: Community,
        value: Option<SmtVar>,
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Self> {
        if ann_community(anns, &community).is_none() {
            return Err(PolicyError::UnknownCommunity(community));
        }
        let value = match value {
            Some(v) => {
                if *v.sort() != Sort::Bool {
                    return Err(SmtError::SortMismatch {
                        expected: Sort::Bool,
                        found: v.sort().clone(),
                    }
                    .into());
                }
                v
            }
            None => ctx.create_fresh_var(
                Sort::Bool,
                "match_community_val_",
                Some(ConcreteValue::Bool(true)),
            )?,
        };
        Ok(Self {
            community,
            value,
            anns: anns.clone(),
            ctx: ctx.clone(),
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn community(&self) -> &Community {
        &self.community
    }

    pub fn value(&self) -> &SmtVar {
        &self.value
    }
}

fn ann_community<'a>(anns: &'a Rc<AnnouncementSet>, tag: &Community) -> Option<&'a SmtVar> {
    anns.first().community(tag)
}

impl Match for MatchCommunity {
    fn is_match(&self, lane: usize) -> PolicyResult<SmtVar> {
        if let Some(hit) = cached(&self.cache, lane) {
            return Ok(hit);
        }
        let ann = self.anns.get(lane).ok_or(PolicyError::LaneOutOfRange {
            index: lane,
            len: self.anns.len(),
        })?;
        let flag = ann
            .community(&self.community)
            .ok_or_else(|| PolicyError::UnknownCommunity(self.community.clone()))?;
        let var = match flag.check_eq(&self.value)? {
            EqOutcome::Concrete(b) => self.ctx.create_fresh_var(
                Sort::Bool,
                "match_community_",
                Some(ConcreteValue::Bool(b)),
            )?,
            EqOutcome::Symbolic(eq) => {
                let var = self
                    .ctx
                    .create_fresh_var(Sort::Bool, "match_community_", None)?;
                self.ctx
                    .register_constraint(var.as_bool().unwrap().eq(&eq), "const_match_community_");
                var
            }
        };
        self.cache.borrow_mut().insert(lane, var.clone());
        Ok(var)
    }
}

/// One predicate chosen among N candidates by a solver-owned index.
///
/// The index variable is ranged over `[0, k)`; after solving, its
/// assignment names the candidate that is in force — this is how missing
/// match structure is synthesized rather than hand-specified.
pub struct SelectOne {
    candidates: Vec<Rc<dyn Match>>,
    index: SmtVar,
    ctx: Rc<SolverContext>,
    cache: LaneCache,
}

impl SelectOne {
    pub fn new(candidates: Vec<Rc<dyn Match>>, ctx: &Rc<SolverContext>) -> PolicyResult<Self> {
        if candidates.is_empty() {
            return Err(PolicyError::NoCandidates);
        }
        let index = ctx.create_fresh_var(Sort::Int, "select_one_index_", None)?;
        let idx = index.as_int().unwrap();
        let range = Bool::and(&[
            idx.ge(&Int::from_i64(0)),
            idx.lt(&Int::from_i64(candidates.len() as i64)),
        ]);
        ctx.register_constraint(range, "select_one_index_range_");
        Ok(Self {
            candidates,
            index,
            ctx: ctx.clone(),
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// The default candidate universe: "some single field equals some
    /// value" — one open attribute match per attribute, plus one
    /// community match per tag carried by the announcements.
    pub fn any_field(
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Self> {
        let mut candidates = Vec::new();
        for attr in Attr::ALL {
            candidates.push(match_for_field(&Field::Attr(attr), None, anns, ctx)?);
        }
        for community in anns.first().communities.keys() {
            candidates.push(match_for_field(
                &Field::Community(community.clone()),
                None,
                anns,
                ctx,
            )?);
        }
        Self::new(candidates, ctx)
    }

    pub fn candidates(&self) -> &[Rc<dyn Match>] {
        &self.candidates
    }

    /// The solver-owned choice variable.
    pub fn index(&self) -> &SmtVar {
        &self.index
    }

    /// The candidate the solver settled on. Valid only after a model has
    /// been bound on the context.
    pub fn get_used_match(&self) -> PolicyResult<Rc<dyn Match>> {
        let idx = self.ctx.int_value(&self.index)?;
        self.candidates
            .get(usize::try_from(idx).map_err(|_| PolicyError::IndexOutOfRange(idx))?)
            .cloned()
            .ok_or(PolicyError::IndexOutOfRange(idx))
    }
}

impl Match for SelectOne {
    fn is_match(&self, lane: usize) -> PolicyResult<SmtVar> {
        if let Some(hit) = cached(&self.cache, lane) {
            return Ok(hit);
        }
        let hits = self
            .candidates
            .iter()
            .map(|c| c.is_match(lane).map(|v| v.as_bool().unwrap()))
            .collect::<PolicyResult<Vec<_>>>()?;
        // Right-associated selection chain; the final branch is reachable
        // only outside the index range constraint.
        let idx = self.index.as_int().unwrap();
        let mut chain = Bool::from_bool(false);
        for (i, hit) in hits.iter().enumerate().rev() {
            chain = idx.eq(&Int::from_i64(i as i64)).ite(hit, &chain);
        }
        let var = self
            .ctx
            .create_fresh_var(Sort::Bool, "select_one_match_", None)?;
        self.ctx
            .register_constraint(var.as_bool().unwrap().eq(&chain), "const_select_one_");
        self.cache.borrow_mut().insert(lane, var.clone());
        Ok(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announcements::PEER_DOMAIN;
    use crate::testutil;
    use z3::{SatResult, Solver};

    fn peer_value(ctx: &Rc<SolverContext>, member: &str) -> SmtVar {
        ctx.get_enum_type(PEER_DOMAIN)
            .unwrap()
            .get_symbolic_value(member)
            .unwrap()
    }

    #[test]
    fn match_all_and_none_are_concrete() {
        let ctx = testutil::ctx();
        let all = MatchAll::new(&ctx).unwrap();
        let none = MatchNone::new(&ctx).unwrap();
        assert!(all.is_match(0).unwrap().is_concrete_true());
        assert!(!none.is_match(5).unwrap().is_concrete_true());
        assert!(none.is_match(5).unwrap().is_concrete());
        assert_eq!(ctx.constraint_count(), 0);
    }

    #[test]
    fn concrete_peer_match_folds_without_constraints() {
        // Concrete peer equals the target: concrete true, zero constraints.
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let m = MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r1")), &anns, &ctx).unwrap();
        let result = m.is_match(0).unwrap();
        assert!(result.is_concrete_true());
        assert_eq!(ctx.constraint_count(), 0);

        let miss = MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r2")), &anns, &ctx)
            .unwrap()
            .is_match(0)
            .unwrap();
        assert!(miss.is_concrete());
        assert!(!miss.is_concrete_true());
        assert_eq!(ctx.constraint_count(), 0);
    }

    #[test]
    fn symbolic_peer_match_registers_one_constraint() {
        let ctx = testutil::ctx();
        let anns = testutil::symbolic_peer_set(&ctx, 1);
        let m = MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r1")), &anns, &ctx).unwrap();
        let result = m.is_match(0).unwrap();
        assert!(!result.is_concrete());
        assert_eq!(ctx.constraint_count(), 1);
    }

    #[test]
    fn is_match_is_memoized_per_lane() {
        let ctx = testutil::ctx();
        let anns = testutil::symbolic_peer_set(&ctx, 2);
        let m = MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r1")), &anns, &ctx).unwrap();
        let first = m.is_match(0).unwrap();
        let count = ctx.constraint_count();
        let second = m.is_match(0).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.constraint_count(), count);

        // A different lane is a different cache entry.
        let other = m.is_match(1).unwrap();
        assert_ne!(first, other);
        assert_eq!(ctx.constraint_count(), count + 1);
    }

    #[test]
    fn attribute_match_rejects_sort_mismatch() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let err = MatchAttribute::new(Attr::Peer, Some(ctx.int_literal(5)), &anns, &ctx);
        assert!(matches!(err, Err(PolicyError::Smt(SmtError::SortMismatch { .. }))));
    }

    #[test]
    fn lane_out_of_range_is_an_error() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 2);
        let m = MatchAttribute::new(Attr::Peer, None, &anns, &ctx).unwrap();
        assert!(matches!(
            m.is_match(2),
            Err(PolicyError::LaneOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn and_over_concrete_results_short_circuits() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let hit: Rc<dyn Match> = Rc::new(
            MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r1")), &anns, &ctx).unwrap(),
        );
        let hit2: Rc<dyn Match> = Rc::new(
            MatchAttribute::new(Attr::LocalPref, Some(ctx.int_literal(100)), &anns, &ctx).unwrap(),
        );
        let miss: Rc<dyn Match> = Rc::new(
            MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r2")), &anns, &ctx).unwrap(),
        );

        let both = MatchAnd::new(vec![hit.clone(), hit2.clone()], &ctx).unwrap();
        assert!(both.is_match(0).unwrap().is_concrete_true());

        let mixed = MatchAnd::new(vec![hit.clone(), miss.clone()], &ctx).unwrap();
        let folded = mixed.is_match(0).unwrap();
        assert!(folded.is_concrete());
        assert!(!folded.is_concrete_true());

        let either = MatchOr::new(vec![hit, miss], &ctx).unwrap();
        assert!(either.is_match(0).unwrap().is_concrete_true());

        assert_eq!(ctx.constraint_count(), 0);
    }

    #[test]
    fn and_with_symbolic_input_registers_conjunction() {
        let ctx = testutil::ctx();
        let anns = testutil::symbolic_peer_set(&ctx, 1);
        let symbolic: Rc<dyn Match> =
            Rc::new(MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r1")), &anns, &ctx).unwrap());
        let concrete: Rc<dyn Match> = Rc::new(
            MatchAttribute::new(Attr::LocalPref, Some(ctx.int_literal(100)), &anns, &ctx).unwrap(),
        );
        let and = MatchAnd::new(vec![symbolic, concrete], &ctx).unwrap();
        let before = ctx.constraint_count();
        let result = and.is_match(0).unwrap();
        assert!(!result.is_concrete());
        // One constraint for the symbolic sub-match, one for the conjunction.
        assert_eq!(ctx.constraint_count(), before + 2);
    }

    #[test]
    fn community_match_defaults_to_set() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let m = MatchCommunity::new(Community::new("100:10"), None, &anns, &ctx).unwrap();
        assert!(m.is_match(0).unwrap().is_concrete_true());
        let m = MatchCommunity::new(Community::new("100:20"), None, &anns, &ctx).unwrap();
        assert!(!m.is_match(0).unwrap().is_concrete_true());
        assert_eq!(ctx.constraint_count(), 0);
    }

    #[test]
    fn unknown_community_is_rejected_at_construction() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let err = MatchCommunity::new(Community::new("999:1"), None, &anns, &ctx);
        assert!(matches!(err, Err(PolicyError::UnknownCommunity(_))));
    }

    #[test]
    fn select_one_registers_exact_range_constraint() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let candidates: Vec<Rc<dyn Match>> = ["r1", "r2", "r3"]
            .iter()
            .map(|peer| {
                Rc::new(
                    MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, peer)), &anns, &ctx)
                        .unwrap(),
                ) as Rc<dyn Match>
            })
            .collect();
        let before = ctx.constraint_count();
        let select = SelectOne::new(candidates, &ctx).unwrap();
        assert_eq!(ctx.constraint_count(), before + 1);

        // 0 <= index < 3 is satisfiable at the edges and nowhere else.
        let solver = Solver::new();
        ctx.load_constraints(&solver).unwrap();
        let idx = select.index().as_int().unwrap();
        solver.push();
        solver.assert(idx.eq(&Int::from_i64(2)));
        assert_eq!(solver.check(), SatResult::Sat);
        solver.pop(1);
        solver.push();
        solver.assert(idx.eq(&Int::from_i64(3)));
        assert_eq!(solver.check(), SatResult::Unsat);
        solver.pop(1);
        solver.assert(idx.lt(&Int::from_i64(0)));
        assert_eq!(solver.check(), SatResult::Unsat);
    }

    #[test]
    fn single_candidate_forces_index_zero() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let only: Rc<dyn Match> = Rc::new(
            MatchAttribute::new(Attr::Peer, Some(peer_value(&ctx, "r1")), &anns, &ctx).unwrap(),
        );
        let select = SelectOne::new(vec![only], &ctx).unwrap();
        let solver = Solver::new();
        ctx.load_constraints(&solver).unwrap();
        assert_eq!(solver.check(), SatResult::Sat);
        ctx.bind_model(solver.get_model().unwrap());
        assert_eq!(ctx.int_value(select.index()).unwrap(), 0);
        assert!(Rc::ptr_eq(
            &select.get_used_match().unwrap(),
            &select.candidates()[0]
        ));
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let ctx = testutil::ctx();
        assert!(matches!(
            SelectOne::new(Vec::new(), &ctx),
            Err(PolicyError::NoCandidates)
        ));
    }

    #[test]
    fn get_used_match_before_solving_fails() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let select = SelectOne::any_field(&anns, &ctx).unwrap();
        assert!(matches!(
            select.get_used_match(),
            Err(PolicyError::Smt(SmtError::NotSolved))
        ));
    }

    #[test]
    fn any_field_universe_spans_attributes_and_communities() {
        let ctx = testutil::ctx();
        let anns = testutil::concrete_set(&ctx, 1);
        let select = SelectOne::any_field(&anns, &ctx).unwrap();
        // Nine attributes plus the two communities carried by the lanes.
        assert_eq!(select.candidates().len(), Attr::ALL.len() + 2);
    }
}
