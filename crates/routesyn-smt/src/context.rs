//! Process-wide solver state: fresh variables, ordered constraints, finite
//! enum domains, and post-solve model access.
//!
//! Constraint registration is append-only and order-preserving. Nothing is
//! asserted into a `z3::Solver` until [`SolverContext::load_constraints`],
//! which also pins constant-foldable variables to their values and bounds
//! symbolic enum variables to their domains. Deferring the pins keeps the
//! registered constraint set proportional to genuine uncertainty, and
//! deferring the bounds lets domains grow (member injection) between
//! construction and solving.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info};
use z3::ast::{Bool, Dynamic, Int};
use z3::{Model, Solver};

use crate::value::{ConcreteValue, SmtVar, Sort};
use crate::{SmtError, SmtResult};

/// A named finite enumeration, encoded as interned member indices.
///
/// Handles are cheap to clone and share their member list, so a member
/// injected through one handle is visible through every other.
#[derive(Debug, Clone)]
pub struct FiniteDomain {
    name: String,
    members: Rc<RefCell<Vec<String>>>,
}

impl FiniteDomain {
    fn new(name: &str, members: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            members: Rc::new(RefCell::new(
                members.iter().map(|m| m.to_string()).collect(),
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> Sort {
        Sort::Enum(self.name.clone())
    }

    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    pub fn members(&self) -> Vec<String> {
        self.members.borrow().clone()
    }

    pub fn index_of(&self, member: &str) -> Option<usize> {
        self.members.borrow().iter().position(|m| m == member)
    }

    /// One concrete value per member, in domain order.
    pub fn symbolic_values(&self) -> Vec<SmtVar> {
        self.members
            .borrow()
            .iter()
            .enumerate()
            .map(|(idx, member)| self.constant(idx, member))
            .collect()
    }

    /// The concrete value for a known member.
    pub fn get_symbolic_value(&self, member: &str) -> SmtResult<SmtVar> {
        match self.index_of(member) {
            Some(idx) => Ok(self.constant(idx, member)),
            None => Err(SmtError::UnknownMember {
                domain: self.name.clone(),
                member: member.to_string(),
            }),
        }
    }

    /// Look up a member, injecting it at the end of the domain if absent.
    pub fn insert(&self, member: &str) -> SmtVar {
        if let Some(idx) = self.index_of(member) {
            return self.constant(idx, member);
        }
        let mut members = self.members.borrow_mut();
        members.push(member.to_string());
        let idx = members.len() - 1;
        drop(members);
        debug!(domain = %self.name, member, "injected enum member");
        self.constant(idx, member)
    }

    fn constant(&self, idx: usize, member: &str) -> SmtVar {
        SmtVar::new(
            format!("{}::{}", self.name, member),
            self.sort(),
            Dynamic::from_ast(&Int::from_i64(idx as i64)),
            Some(ConcreteValue::Member(member.to_string())),
        )
    }
}

/// Shared, single-threaded solver state for one synthesis session.
///
/// All match/action nodes of a session hold the same context (via `Rc`)
/// and draw fresh names from one counter, so variable and constraint
/// names are unique and reproducible across runs.
#[derive(Default)]
pub struct SolverContext {
    counter: RefCell<usize>,
    constraints: RefCell<Vec<(String, Bool)>>,
    tracked: RefCell<Vec<SmtVar>>,
    domains: RefCell<BTreeMap<String, FiniteDomain>>,
    communities: RefCell<Vec<String>>,
    model: RefCell<Option<Model>>,
}

impl SolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a unique name from the session counter.
    pub fn fresh_name(&self, prefix: &str) -> String {
        let mut counter = self.counter.borrow_mut();
        let n = *counter;
        *counter += 1;
        format!("{prefix}{n}")
    }

    /// Allocate a named Z3 constant of the given sort.
    ///
    /// A provided concrete `value` marks the result constant-foldable; it
    /// must agree with the sort, and enum members must already exist in
    /// their domain. The pin `var == value` is asserted at load time, not
    /// here.
    pub fn create_fresh_var(
        &self,
        sort: Sort,
        name_prefix: &str,
        value: Option<ConcreteValue>,
    ) -> SmtResult<SmtVar> {
        if let Some(v) = &value {
            self.check_value_sort(v, &sort)?;
        }
        let name = self.fresh_name(name_prefix);
        let ast = match &sort {
            Sort::Bool => Dynamic::from_ast(&Bool::new_const(name.clone())),
            Sort::Int | Sort::Enum(_) => Dynamic::from_ast(&Int::new_const(name.clone())),
        };
        let var = SmtVar::new(name, sort, ast, value);
        self.tracked.borrow_mut().push(var.clone());
        Ok(var)
    }

    /// A literal integer (no solver variable, nothing to pin).
    pub fn int_literal(&self, value: i64) -> SmtVar {
        SmtVar::new(
            format!("lit!{value}"),
            Sort::Int,
            Dynamic::from_ast(&Int::from_i64(value)),
            Some(ConcreteValue::Int(value)),
        )
    }

    /// A literal boolean (no solver variable, nothing to pin).
    pub fn bool_literal(&self, value: bool) -> SmtVar {
        SmtVar::new(
            format!("lit!{value}"),
            Sort::Bool,
            Dynamic::from_ast(&Bool::from_bool(value)),
            Some(ConcreteValue::Bool(value)),
        )
    }

    /// Append to the ordered constraint set.
    pub fn register_constraint(&self, constraint: Bool, name_prefix: &str) {
        let name = self.fresh_name(name_prefix);
        self.constraints.borrow_mut().push((name, constraint));
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.borrow().len()
    }

    /// The registered constraints, in registration order.
    pub fn constraints(&self) -> Vec<(String, Bool)> {
        self.constraints.borrow().clone()
    }

    /// Register a new enum domain. Registering the same name twice is a
    /// contract violation.
    pub fn register_enum_type(&self, name: &str, members: &[&str]) -> SmtResult<FiniteDomain> {
        let mut domains = self.domains.borrow_mut();
        if domains.contains_key(name) {
            return Err(SmtError::DuplicateDomain(name.to_string()));
        }
        let domain = FiniteDomain::new(name, members);
        domains.insert(name.to_string(), domain.clone());
        Ok(domain)
    }

    pub fn get_enum_type(&self, name: &str) -> SmtResult<FiniteDomain> {
        self.domains
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| SmtError::UnknownDomain(name.to_string()))
    }

    /// Record a known community tag. Order of first registration is kept;
    /// duplicates are ignored.
    pub fn register_community(&self, tag: &str) {
        let mut communities = self.communities.borrow_mut();
        if !communities.iter().any(|c| c == tag) {
            communities.push(tag.to_string());
        }
    }

    /// The known community tags, in registration order.
    pub fn communities(&self) -> Vec<String> {
        self.communities.borrow().clone()
    }

    /// Assert the session into a solver: every registered constraint in
    /// insertion order, then the value pin for each concrete variable and
    /// the domain bound for each symbolic enum variable. Domain sizes are
    /// read here, so members injected after variable creation are honored.
    pub fn load_constraints(&self, solver: &Solver) -> SmtResult<()> {
        let constraints = self.constraints.borrow();
        for (_, constraint) in constraints.iter() {
            solver.assert(constraint);
        }
        let tracked = self.tracked.borrow();
        let mut pins = 0usize;
        let mut bounds = 0usize;
        for var in tracked.iter() {
            match var.value() {
                Some(ConcreteValue::Bool(b)) => {
                    solver.assert(var.as_bool().unwrap().eq(&Bool::from_bool(*b)));
                    pins += 1;
                }
                Some(ConcreteValue::Int(n)) => {
                    solver.assert(var.as_int().unwrap().eq(&Int::from_i64(*n)));
                    pins += 1;
                }
                Some(ConcreteValue::Member(member)) => {
                    let Sort::Enum(domain_name) = var.sort() else {
                        unreachable!("member value on non-enum sort");
                    };
                    let domain = self.get_enum_type(domain_name)?;
                    let idx = domain.index_of(member).ok_or_else(|| SmtError::UnknownMember {
                        domain: domain_name.clone(),
                        member: member.clone(),
                    })?;
                    solver.assert(var.as_int().unwrap().eq(&Int::from_i64(idx as i64)));
                    pins += 1;
                }
                None => {
                    if let Sort::Enum(domain_name) = var.sort() {
                        let domain = self.get_enum_type(domain_name)?;
                        let v = var.as_int().unwrap();
                        let in_range = Bool::and(&[
                            v.ge(&Int::from_i64(0)),
                            v.lt(&Int::from_i64(domain.len() as i64)),
                        ]);
                        solver.assert(in_range);
                        bounds += 1;
                    }
                }
            }
        }
        info!(
            constraints = constraints.len(),
            pins, bounds, "loaded session into solver"
        );
        Ok(())
    }

    /// Bind the model produced by a satisfiable solve, enabling readback.
    pub fn bind_model(&self, model: Model) {
        *self.model.borrow_mut() = Some(model);
    }

    pub fn has_model(&self) -> bool {
        self.model.borrow().is_some()
    }

    /// Read a value back: its own concrete payload when present, otherwise
    /// the bound model's assignment.
    pub fn value_of(&self, var: &SmtVar) -> SmtResult<ConcreteValue> {
        if let Some(v) = var.value() {
            return Ok(v.clone());
        }
        let model = self.model.borrow();
        let model = model.as_ref().ok_or(SmtError::NotSolved)?;
        let evaluated = model
            .eval(var.ast(), true)
            .ok_or_else(|| SmtError::NoAssignment(var.name().to_string()))?;
        match var.sort() {
            Sort::Bool => evaluated
                .as_bool()
                .and_then(|b| b.as_bool())
                .map(ConcreteValue::Bool)
                .ok_or_else(|| SmtError::NoAssignment(var.name().to_string())),
            Sort::Int => evaluated
                .as_int()
                .and_then(|i| i.as_i64())
                .map(ConcreteValue::Int)
                .ok_or_else(|| SmtError::NoAssignment(var.name().to_string())),
            Sort::Enum(domain_name) => {
                let idx = evaluated
                    .as_int()
                    .and_then(|i| i.as_i64())
                    .ok_or_else(|| SmtError::NoAssignment(var.name().to_string()))?;
                let domain = self.get_enum_type(domain_name)?;
                let members = domain.members();
                members
                    .get(idx as usize)
                    .map(|m| ConcreteValue::Member(m.clone()))
                    .ok_or_else(|| SmtError::UnknownMember {
                        domain: domain_name.clone(),
                        member: format!("#{idx}"),
                    })
            }
        }
    }

    fn check_value_sort(&self, value: &ConcreteValue, sort: &Sort) -> SmtResult<()> {
        match (value, sort) {
            (ConcreteValue::Bool(_), Sort::Bool) | (ConcreteValue::Int(_), Sort::Int) => Ok(()),
            (ConcreteValue::Member(member), Sort::Enum(domain_name)) => {
                let domain = self.get_enum_type(domain_name)?;
                if domain.index_of(member).is_none() {
                    return Err(SmtError::UnknownMember {
                        domain: domain_name.clone(),
                        member: member.clone(),
                    });
                }
                Ok(())
            }
            _ => Err(SmtError::ValueSortMismatch {
                value: value.clone(),
                sort: sort.clone(),
            }),
        }
    }

    /// Read an integer-sorted value back.
    pub fn int_value(&self, var: &SmtVar) -> SmtResult<i64> {
        if let Some(ConcreteValue::Int(n)) = var.value() {
            return Ok(*n);
        }
        let model = self.model.borrow();
        let model = model.as_ref().ok_or(SmtError::NotSolved)?;
        model
            .eval(var.ast(), true)
            .and_then(|v| v.as_int())
            .and_then(|i| i.as_i64())
            .ok_or_else(|| SmtError::NoAssignment(var.name().to_string()))
    }
}
