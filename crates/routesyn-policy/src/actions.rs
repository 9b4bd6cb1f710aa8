//! Attribute-setting actions: transformations of one announcement-set
//! version into the next.
//!
//! Constructing an action executes it immediately; `execute` guards
//! against re-entry, so the output version is produced exactly once. Each
//! action exposes its footprint — the attributes and community tags it can
//! change — which [`SetOne`] uses to pass everything else through without
//! allocating solver variables.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use routesyn_smt::{ConcreteValue, SmtError, SmtVar, SolverContext, Sort};
use z3::ast::{Bool, Int};

use crate::announcements::{AnnouncementSet, Attr, Community, Field};
use crate::factory::action_for_field;
use crate::matches::Match;
use crate::{PolicyError, PolicyResult};

/// A transformation of an announcement set, guarded by a match.
pub trait Action {
    /// The guard predicate shared with any sibling candidates.
    fn guard(&self) -> Rc<dyn Match>;

    /// The input version.
    fn old_announcements(&self) -> Rc<AnnouncementSet>;

    /// The output version, produced during construction.
    fn announcements(&self) -> Rc<AnnouncementSet>;

    /// Attributes this action can change.
    fn attributes(&self) -> BTreeSet<Attr>;

    /// Community tags this action can change.
    fn communities(&self) -> BTreeSet<Community>;

    /// Produce the output version. Idempotent: once populated, re-entry
    /// is a no-op.
    fn execute(&self) -> PolicyResult<()>;
}

/// Constraint `fresh == If(index == 0, choices[0], ... fallback)`, the
/// chain folded right-associated in candidate order so the lowest index
/// wins.
fn selection_constraint(index: &Int, fresh: &SmtVar, choices: &[SmtVar], fallback: &SmtVar) -> Bool {
    match fresh.sort() {
        Sort::Bool => {
            let mut chain = fallback.as_bool().unwrap();
            for (i, choice) in choices.iter().enumerate().rev() {
                chain = index
                    .eq(&Int::from_i64(i as i64))
                    .ite(&choice.as_bool().unwrap(), &chain);
            }
            fresh.as_bool().unwrap().eq(&chain)
        }
        Sort::Int | Sort::Enum(_) => {
            let mut chain = fallback.as_int().unwrap();
            for (i, choice) in choices.iter().enumerate().rev() {
                chain = index
                    .eq(&Int::from_i64(i as i64))
                    .ite(&choice.as_int().unwrap(), &chain);
            }
            fresh.as_int().unwrap().eq(&chain)
        }
    }
}

/// Overwrite one attribute wherever the guard matches.
pub struct SetAttribute {
    guard: Rc<dyn Match>,
    attr: Attr,
    value: SmtVar,
    old_anns: Rc<AnnouncementSet>,
    new_anns: RefCell<Option<Rc<AnnouncementSet>>>,
    name: String,
    ctx: Rc<SolverContext>,
}

impl SetAttribute {
    /// `value = None` leaves the written value open: a fresh variable of
    /// the attribute's sort, for the solver to pick.
    pub fn new(
        guard: Rc<dyn Match>,
        attr: Attr,
        value: Option<SmtVar>,
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Rc<Self>> {
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
            None => ctx.create_fresh_var(attr_sort, &format!("set_{attr}_val_"), None)?,
        };
        let action = Rc::new(Self {
            guard,
            attr,
            value,
            old_anns: anns.clone(),
            new_anns: RefCell::new(None),
            name: ctx.fresh_name(&format!("set_{attr}_")),
            ctx: ctx.clone(),
        });
        action.execute()?;
        Ok(action)
    }

    pub fn attr(&self) -> Attr {
        self.attr
    }

    /// The value written where the guard matches.
    pub fn value(&self) -> &SmtVar {
        &self.value
    }
}

impl Action for SetAttribute {
    fn guard(&self) -> Rc<dyn Match> {
        self.guard.clone()
    }

    fn old_announcements(&self) -> Rc<AnnouncementSet> {
        self.old_anns.clone()
    }

    fn announcements(&self) -> Rc<AnnouncementSet> {
        self.new_anns
            .borrow()
            .as_ref()
            .expect("executed at construction")
            .clone()
    }

    fn attributes(&self) -> BTreeSet<Attr> {
        BTreeSet::from([self.attr])
    }

    fn communities(&self) -> BTreeSet<Community> {
        BTreeSet::new()
    }

    fn execute(&self) -> PolicyResult<()> {
        if self.new_anns.borrow().is_some() {
            return Ok(());
        }
        let mut constraints = Vec::new();
        let mut lanes = Vec::with_capacity(self.old_anns.len());
        for (lane, ann) in self.old_anns.iter().enumerate() {
            let old_var = ann.attr(self.attr);
            let is_match = self.guard.is_match(lane)?;
            let new_var = if is_match.is_concrete() {
                if is_match.is_concrete_true() {
                    self.value.clone()
                } else {
                    old_var.clone()
                }
            } else {
                let fresh = self.ctx.create_fresh_var(
                    old_var.sort().clone(),
                    &format!("set_{}_lane_", self.attr),
                    None,
                )?;
                let assigned = fresh.eq_expr(&self.value)?;
                let untouched = fresh.eq_expr(old_var)?;
                constraints.push(is_match.as_bool().unwrap().ite(&assigned, &untouched));
                fresh
            };
            lanes.push(ann.with_attr(self.attr, new_var));
        }
        if !constraints.is_empty() {
            self.ctx
                .register_constraint(Bool::and(&constraints), &format!("const_set_{}_", self.attr));
        }
        let next = self.old_anns.create_new(lanes, &self.name)?;
        *self.new_anns.borrow_mut() = Some(next);
        Ok(())
    }
}

/// Overwrite one community membership flag wherever the guard matches.
pub struct SetCommunity {
    guard: Rc<dyn Match>,
    community: Community,
    value: SmtVar,
    old_anns: Rc<AnnouncementSet>,
    new_anns: RefCell<Option<Rc<AnnouncementSet>>>,
    name: String,
    ctx: Rc<SolverContext>,
}

impl SetCommunity {
    /// `value = None` defaults to concrete `true`: tag the route.
    pub fn new(
        guard: Rc<dyn Match>,
        community: Community,
        value: Option<SmtVar>,
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Rc<Self>> {
        if anns.first().community(&community).is_none() {
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
                "set_community_val_",
                Some(ConcreteValue::Bool(true)),
            )?,
        };
        let action = Rc::new(Self {
            guard,
            community,
            value,
            old_anns: anns.clone(),
            new_anns: RefCell::new(None),
            name: ctx.fresh_name("set_community_"),
            ctx: ctx.clone(),
        });
        action.execute()?;
        Ok(action)
    }

    pub fn community(&self) -> &Community {
        &self.community
    }

    pub fn value(&self) -> &SmtVar {
        &self.value
    }
}

impl Action for SetCommunity {
    fn guard(&self) -> Rc<dyn Match> {
        self.guard.clone()
    }

    fn old_announcements(&self) -> Rc<AnnouncementSet> {
        self.old_anns.clone()
    }

    fn announcements(&self) -> Rc<AnnouncementSet> {
        self.new_anns
            .borrow()
            .as_ref()
            .expect("executed at construction")
            .clone()
    }

    fn attributes(&self) -> BTreeSet<Attr> {
        BTreeSet::new()
    }

    fn communities(&self) -> BTreeSet<Community> {
        BTreeSet::from([self.community.clone()])
    }

    fn execute(&self) -> PolicyResult<()> {
        if self.new_anns.borrow().is_some() {
            return Ok(());
        }
        let mut constraints = Vec::new();
        let mut lanes = Vec::with_capacity(self.old_anns.len());
        for (lane, ann) in self.old_anns.iter().enumerate() {
            let old_flag = ann
                .community(&self.community)
                .ok_or_else(|| PolicyError::UnknownCommunity(self.community.clone()))?;
            let is_match = self.guard.is_match(lane)?;
            let new_flag = if is_match.is_concrete() {
                if is_match.is_concrete_true() {
                    self.value.clone()
                } else {
                    old_flag.clone()
                }
            } else {
                let fresh =
                    self.ctx
                        .create_fresh_var(Sort::Bool, "set_community_lane_", None)?;
                let assigned = fresh.eq_expr(&self.value)?;
                let untouched = fresh.eq_expr(old_flag)?;
                constraints.push(is_match.as_bool().unwrap().ite(&assigned, &untouched));
                fresh
            };
            lanes.push(ann.with_community(self.community.clone(), new_flag));
        }
        if !constraints.is_empty() {
            self.ctx
                .register_constraint(Bool::and(&constraints), "const_set_community_");
        }
        let next = self.old_anns.create_new(lanes, &self.name)?;
        *self.new_anns.borrow_mut() = Some(next);
        Ok(())
    }
}

/// One action chosen among N candidates by a solver-owned index.
///
/// All candidates share the same guard and the same input version; the
/// solved index names the action that is in force. Attributes outside the
/// candidates' combined footprint pass through untouched.
pub struct SetOne {
    guard: Rc<dyn Match>,
    candidates: Vec<Rc<dyn Action>>,
    index: SmtVar,
    old_anns: Rc<AnnouncementSet>,
    new_anns: RefCell<Option<Rc<AnnouncementSet>>>,
    name: String,
    ctx: Rc<SolverContext>,
}

impl SetOne {
    pub fn new(
        guard: Rc<dyn Match>,
        candidates: Vec<Rc<dyn Action>>,
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Rc<Self>> {
        if candidates.is_empty() {
            return Err(PolicyError::NoCandidates);
        }
        for candidate in &candidates {
            if !Rc::ptr_eq(&candidate.guard(), &guard) {
                return Err(PolicyError::GuardMismatch);
            }
            if !Rc::ptr_eq(&candidate.old_announcements(), anns) {
                return Err(PolicyError::AnnouncementsMismatch);
            }
        }
        let index = ctx.create_fresh_var(Sort::Int, "set_one_index_", None)?;
        let idx = index.as_int().unwrap();
        let range = Bool::and(&[
            idx.ge(&Int::from_i64(0)),
            idx.lt(&Int::from_i64(candidates.len() as i64)),
        ]);
        ctx.register_constraint(range, "set_one_index_range_");
        let action = Rc::new(Self {
            guard,
            candidates,
            index,
            old_anns: anns.clone(),
            new_anns: RefCell::new(None),
            name: ctx.fresh_name("set_one_"),
            ctx: ctx.clone(),
        });
        action.execute()?;
        Ok(action)
    }

    /// The default candidate universe: one open attribute setter per
    /// attribute, plus one community setter per tag carried by the
    /// announcements, all sharing `guard`.
    pub fn any_field(
        guard: Rc<dyn Match>,
        anns: &Rc<AnnouncementSet>,
        ctx: &Rc<SolverContext>,
    ) -> PolicyResult<Rc<Self>> {
        let mut candidates = Vec::new();
        for attr in Attr::ALL {
            candidates.push(action_for_field(
                &Field::Attr(attr),
                guard.clone(),
                None,
                anns,
                ctx,
            )?);
        }
        for community in anns.first().communities.keys() {
            candidates.push(action_for_field(
                &Field::Community(community.clone()),
                guard.clone(),
                None,
                anns,
                ctx,
            )?);
        }
        Self::new(guard, candidates, anns, ctx)
    }

    pub fn candidates(&self) -> &[Rc<dyn Action>] {
        &self.candidates
    }

    /// The solver-owned choice variable.
    pub fn index(&self) -> &SmtVar {
        &self.index
    }

    /// The candidate the solver settled on. Valid only after a model has
    /// been bound on the context.
    pub fn get_used_action(&self) -> PolicyResult<Rc<dyn Action>> {
        let idx = self.ctx.int_value(&self.index)?;
        self.candidates
            .get(usize::try_from(idx).map_err(|_| PolicyError::IndexOutOfRange(idx))?)
            .cloned()
            .ok_or(PolicyError::IndexOutOfRange(idx))
    }
}

impl Action for SetOne {
    fn guard(&self) -> Rc<dyn Match> {
        self.guard.clone()
    }

    fn old_announcements(&self) -> Rc<AnnouncementSet> {
        self.old_anns.clone()
    }

    fn announcements(&self) -> Rc<AnnouncementSet> {
        self.new_anns
            .borrow()
            .as_ref()
            .expect("executed at construction")
            .clone()
    }

    fn attributes(&self) -> BTreeSet<Attr> {
        self.candidates
            .iter()
            .flat_map(|c| c.attributes())
            .collect()
    }

    fn communities(&self) -> BTreeSet<Community> {
        self.candidates
            .iter()
            .flat_map(|c| c.communities())
            .collect()
    }

    fn execute(&self) -> PolicyResult<()> {
        if self.new_anns.borrow().is_some() {
            return Ok(());
        }
        for candidate in &self.candidates {
            candidate.execute()?;
        }
        let touched_attrs = self.attributes();
        let touched_comms = self.communities();
        let idx = self.index.as_int().unwrap();
        let mut lanes = Vec::with_capacity(self.old_anns.len());
        for (lane, old_ann) in self.old_anns.iter().enumerate() {
            let mut ann = old_ann.clone();
            for attr in Attr::ALL {
                if !touched_attrs.contains(&attr) {
                    continue;
                }
                let old_var = old_ann.attr(attr);
                let choices: Vec<SmtVar> = self
                    .candidates
                    .iter()
                    .map(|c| c.announcements()[lane].attr(attr).clone())
                    .collect();
                let fresh = self.ctx.create_fresh_var(
                    old_var.sort().clone(),
                    &format!("set_one_{attr}_"),
                    None,
                )?;
                self.ctx.register_constraint(
                    selection_constraint(&idx, &fresh, &choices, old_var),
                    &format!("const_set_one_{attr}_"),
                );
                ann = ann.with_attr(attr, fresh);
            }
            for tag in &touched_comms {
                let old_flag = old_ann
                    .community(tag)
                    .ok_or_else(|| PolicyError::UnknownCommunity(tag.clone()))?;
                let choices = self
                    .candidates
                    .iter()
                    .map(|c| {
                        c.announcements()[lane]
                            .community(tag)
                            .cloned()
                            .ok_or_else(|| PolicyError::UnknownCommunity(tag.clone()))
                    })
                    .collect::<PolicyResult<Vec<_>>>()?;
                let fresh = self
                    .ctx
                    .create_fresh_var(Sort::Bool, "set_one_community_", None)?;
                self.ctx.register_constraint(
                    selection_constraint(&idx, &fresh, &choices, old_flag),
                    "const_set_one_community_",
                );
                ann = ann.with_community(tag.clone(), fresh);
            }
            lanes.push(ann);
        }
        let next = self.old_anns.create_new(lanes, &self.name)?;
        *self.new_anns.borrow_mut() = Some(next);
        Ok(())
    }
}
