#![forbid(unsafe_code)]

//! Interpretation strategies for tensorterm expressions.
//!
//! An [`Interpreter`] walks a term bottom-up through an ordered list of
//! [`Stage`]s. Each stage owns a dispatch registry; a handler either returns
//! a rewritten term, which later stages then see, or declines. The walk is
//! compiled into a [`Trampoline`] queue program so native stack use does not
//! grow with expression depth.

mod align;
mod argreduce;
pub mod contract;
mod eager;
mod interpreter;
mod materialize;
pub mod rewrite;
mod trampoline;

use tt_core::TermError;
use tt_lax::EvalError;

pub use argreduce::{ArgReduced, argreduce};
pub use contract::{ContractHandler, ContractRequest, ContractionAlgebra};
pub use eager::eager_stage;
pub use interpreter::{Ctx, Environment, Handler, Interpreter, Pipeline, Stage};
pub use materialize::materialize;
pub use rewrite::CostModel;
pub use trampoline::{DriverError, StepFn, Trampoline};

#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    Term(TermError),
    Eval(EvalError),
    /// A correctness fence: the requested rewrite is not valid in general.
    Unsupported {
        operation: &'static str,
        detail: String,
    },
    NoHandler {
        registry: &'static str,
        key: String,
    },
    /// The deferred-call driver ended in an inconsistent state.
    Driver {
        detail: String,
    },
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Term(err) => write!(f, "term construction failed: {err}"),
            Self::Eval(err) => write!(f, "backend evaluation failed: {err}"),
            Self::Unsupported { operation, detail } => {
                write!(f, "unsupported {operation}: {detail}")
            }
            Self::NoHandler { registry, key } => {
                write!(f, "no handler in `{registry}` for {key}")
            }
            Self::Driver { detail } => write!(f, "driver defect: {detail}"),
        }
    }
}

impl std::error::Error for InterpretError {}

impl From<TermError> for InterpretError {
    fn from(value: TermError) -> Self {
        Self::Term(value)
    }
}

impl From<EvalError> for InterpretError {
    fn from(value: EvalError) -> Self {
        Self::Eval(value)
    }
}

impl From<DriverError<InterpretError>> for InterpretError {
    fn from(value: DriverError<InterpretError>) -> Self {
        match value {
            DriverError::Step(err) => err,
            other => Self::Driver {
                detail: other.to_string(),
            },
        }
    }
}

impl InterpretError {
    pub(crate) fn unsupported(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Unsupported {
            operation,
            detail: detail.into(),
        }
    }
}
