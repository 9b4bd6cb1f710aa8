//! Sort-tagged symbolic values.

use std::fmt;

use z3::ast::{Bool, Dynamic, Int};

use crate::{SmtError, SmtResult};

/// Sort of a symbolic value.
///
/// Enum domains are identified by name; their members live in the
/// [`FiniteDomain`](crate::FiniteDomain) registry of the solver context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sort {
    Bool,
    Int,
    Enum(String),
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "bool"),
            Sort::Int => write!(f, "int"),
            Sort::Enum(name) => write!(f, "enum({name})"),
        }
    }
}

/// Concrete payload of a constant-foldable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcreteValue {
    Bool(bool),
    Int(i64),
    /// Member of the enum domain named by the value's sort.
    Member(String),
}

impl fmt::Display for ConcreteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcreteValue::Bool(b) => write!(f, "{b}"),
            ConcreteValue::Int(n) => write!(f, "{n}"),
            ConcreteValue::Member(m) => write!(f, "{m}"),
        }
    }
}

/// Outcome of comparing two symbolic values.
#[derive(Debug, Clone)]
pub enum EqOutcome {
    /// Both sides were concrete; decided in the host.
    Concrete(bool),
    /// At least one side is symbolic; a Z3 equality.
    Symbolic(Bool),
}

/// A solver value tagged with its sort and an optional concrete payload.
///
/// Cloning is cheap and identity-preserving: clones share the same Z3 AST
/// and compare equal.
#[derive(Debug, Clone)]
pub struct SmtVar {
    name: String,
    sort: Sort,
    ast: Dynamic,
    value: Option<ConcreteValue>,
}

impl PartialEq for SmtVar {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.sort == other.sort
    }
}

impl Eq for SmtVar {}

impl fmt::Display for SmtVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}:{}", self.name, self.sort),
        }
    }
}

impl SmtVar {
    pub(crate) fn new(name: String, sort: Sort, ast: Dynamic, value: Option<ConcreteValue>) -> Self {
        Self {
            name,
            sort,
            ast,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// The underlying Z3 term.
    pub fn ast(&self) -> &Dynamic {
        &self.ast
    }

    pub fn value(&self) -> Option<&ConcreteValue> {
        self.value.as_ref()
    }

    pub fn is_concrete(&self) -> bool {
        self.value.is_some()
    }

    /// True iff the value is concrete `true`. False for concrete `false`
    /// and for symbolic values.
    pub fn is_concrete_true(&self) -> bool {
        matches!(self.value, Some(ConcreteValue::Bool(true)))
    }

    /// The Z3 term viewed as a boolean, if the sort allows it.
    pub fn as_bool(&self) -> Option<Bool> {
        self.ast.as_bool()
    }

    /// The Z3 term viewed as an integer. Enum-sorted values are backed by
    /// their member index, so they read back as integers too.
    pub fn as_int(&self) -> Option<Int> {
        self.ast.as_int()
    }

    /// Compare against `other`, deciding in the host when both sides are
    /// concrete. Sorts must be identical.
    pub fn check_eq(&self, other: &SmtVar) -> SmtResult<EqOutcome> {
        if self.sort != other.sort {
            return Err(SmtError::SortMismatch {
                expected: self.sort.clone(),
                found: other.sort.clone(),
            });
        }
        if let (Some(a), Some(b)) = (&self.value, &other.value) {
            return Ok(EqOutcome::Concrete(a == b));
        }
        Ok(EqOutcome::Symbolic(self.eq_expr(other)?))
    }

    /// Z3 equality between the two terms, regardless of concreteness.
    /// Sorts must be identical.
    pub fn eq_expr(&self, other: &SmtVar) -> SmtResult<Bool> {
        if self.sort != other.sort {
            return Err(SmtError::SortMismatch {
                expected: self.sort.clone(),
                found: other.sort.clone(),
            });
        }
        let eq = match self.sort {
            Sort::Bool => self
                .ast
                .as_bool()
                .unwrap()
                .eq(&other.ast.as_bool().unwrap()),
            Sort::Int | Sort::Enum(_) => {
                self.ast.as_int().unwrap().eq(&other.ast.as_int().unwrap())
            }
        };
        Ok(eq)
    }
}
