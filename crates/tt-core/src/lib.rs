#![forbid(unsafe_code)]

//! Term model for symbolic tensor expressions over named dimensions.
//!
//! Every expression is an immutable, hash-consed [`Term`]. Constructing the
//! same node twice yields the same instance, so identity comparison is
//! structural comparison. Terms carry an ordered schema of free dimensions
//! and are consumed by the interpreters in `tt-interpreters`.

#[cfg(test)]
pub mod proptest_strategies;

mod error;
mod intern;
mod schema;
mod term;
mod value;

pub use error::{ErrorCategory, TermError};
pub use intern::{interned_count, sweep_interner};
pub use schema::Schema;
pub use term::{Node, Term, TermId, View};
pub use value::{DType, Literal, Shape, TensorValue, ValueError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name of a tensor dimension.
pub type Dim = String;

/// Unordered set of dimension names with deterministic iteration order.
pub type DimSet = BTreeSet<Dim>;

/// Builds a [`DimSet`] from anything yielding dimension names.
#[must_use]
pub fn dim_set<I, S>(dims: I) -> DimSet
where
    I: IntoIterator<Item = S>,
    S: Into<Dim>,
{
    dims.into_iter().map(Into::into).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Real,
    Density,
}

impl Domain {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Density => "density",
        }
    }
}

/// Size of a single dimension: a finite cardinality or a continuous domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Size {
    Discrete(u32),
    Continuous(Domain),
}

impl Size {
    #[must_use]
    pub fn is_discrete(self) -> bool {
        matches!(self, Self::Discrete(_))
    }

    #[must_use]
    pub fn cardinality(self) -> Option<u32> {
        match self {
            Self::Discrete(n) => Some(n),
            Self::Continuous(_) => None,
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discrete(n) => write!(f, "{n}"),
            Self::Continuous(domain) => write!(f, "{}", domain.as_str()),
        }
    }
}

/// Operator tags shared by every node variant that carries an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    // Unary
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Log1p,
    Invert,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    // Logical
    And,
    Or,
    Xor,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Selection
    Min,
    Max,
    LogAddExp,
    // Argreduce only
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArity {
    Unary,
    Binary,
    /// Only meaningful as an argreduce operator.
    Selector,
}

impl Op {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Log1p => "log1p",
            Self::Invert => "invert",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Pow => "pow",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Min => "min",
            Self::Max => "max",
            Self::LogAddExp => "logaddexp",
            Self::Sample => "sample",
        }
    }

    #[must_use]
    pub fn arity(self) -> OpArity {
        match self {
            Self::Neg
            | Self::Abs
            | Self::Sqrt
            | Self::Exp
            | Self::Log
            | Self::Log1p
            | Self::Invert => OpArity::Unary,
            Self::Sample => OpArity::Selector,
            _ => OpArity::Binary,
        }
    }

    #[must_use]
    pub fn is_unary(self) -> bool {
        self.arity() == OpArity::Unary
    }

    #[must_use]
    pub fn is_binary(self) -> bool {
        self.arity() == OpArity::Binary
    }

    /// Associative and commutative binary operators. Only these may be used
    /// as reduction operators or flattened into n-ary combinations.
    #[must_use]
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Mul
                | Self::And
                | Self::Or
                | Self::Xor
                | Self::Min
                | Self::Max
                | Self::LogAddExp
        )
    }

    /// Whether `self` (the combine operator) distributes over `reduce`, so
    /// that `reduce_j(a_j self b) == (reduce_j a_j) self b` for `b` constant in `j`.
    #[must_use]
    pub fn distributes_over(self, reduce: Op) -> bool {
        matches!(
            (self, reduce),
            (Self::Mul, Self::Add)
                | (Self::Add, Self::LogAddExp)
                | (Self::Add, Self::Max)
                | (Self::Add, Self::Min)
                | (Self::And, Self::Or)
                | (Self::Or, Self::And)
        )
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime kind of a term, used as the operand discriminator during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TermKind {
    Variable,
    Number,
    Tensor,
    Unary,
    Binary,
    Finitary,
    Reduction,
    Substitution,
    Align,
    Contract,
}

impl TermKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Variable => "Variable",
            Self::Number => "Number",
            Self::Tensor => "Tensor",
            Self::Unary => "Unary",
            Self::Binary => "Binary",
            Self::Finitary => "Finitary",
            Self::Reduction => "Reduction",
            Self::Substitution => "Substitution",
            Self::Align => "Align",
            Self::Contract => "Contract",
        }
    }

    /// Kinds holding concrete data.
    #[must_use]
    pub fn is_concrete(self) -> bool {
        matches!(self, Self::Number | Self::Tensor)
    }
}

impl std::fmt::Display for TermKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Domain, Op, OpArity, Size, dim_set};

    #[test]
    fn op_names_are_stable() {
        assert_eq!(Op::LogAddExp.as_str(), "logaddexp");
        assert_eq!(Op::Add.to_string(), "add");
        assert_eq!(Op::Neg.arity(), OpArity::Unary);
        assert_eq!(Op::Sample.arity(), OpArity::Selector);
    }

    #[test]
    fn associativity_excludes_non_commutative_ops() {
        assert!(Op::Add.is_associative());
        assert!(Op::LogAddExp.is_associative());
        assert!(!Op::Sub.is_associative());
        assert!(!Op::Pow.is_associative());
    }

    #[test]
    fn distributivity_table() {
        assert!(Op::Mul.distributes_over(Op::Add));
        assert!(Op::Add.distributes_over(Op::LogAddExp));
        assert!(!Op::Add.distributes_over(Op::Add));
        assert!(!Op::Mul.distributes_over(Op::Mul));
    }

    #[test]
    fn size_display_and_cardinality() {
        assert_eq!(Size::Discrete(3).to_string(), "3");
        assert_eq!(Size::Continuous(Domain::Real).to_string(), "real");
        assert_eq!(Size::Continuous(Domain::Density).cardinality(), None);
        assert!(Size::Discrete(0).is_discrete());
    }

    #[test]
    fn dim_set_is_sorted_and_deduplicated() {
        let dims = dim_set(["k", "i", "k"]);
        assert_eq!(dims.into_iter().collect::<Vec<_>>(), vec!["i", "k"]);
    }
}
