use std::collections::BTreeMap;

use tt_core::{Dim, DimSet, Op, Term, TermError, View};
use tt_lax::{NumericBackend, PRNGKey};

use crate::InterpretError;

/// Result of [`argreduce`]: one index term per reduced dim, and the term
/// that remains after the reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgReduced {
    pub indices: BTreeMap<Dim, Term>,
    pub remaining: Term,
}

/// Argmin, argmax or categorical sampling over `dims ∩ term.dims`.
///
/// Only a single dim of a dense tensor is supported. Sampling treats the
/// values as log-weights and leaves their logsumexp as the remainder.
pub fn argreduce(
    backend: &dyn NumericBackend,
    term: &Term,
    op: Op,
    dims: &DimSet,
    key: PRNGKey,
) -> Result<ArgReduced, InterpretError> {
    if !matches!(op, Op::Min | Op::Max | Op::Sample) {
        return Err(InterpretError::unsupported(
            "argreduce",
            format!("`{}` is not min, max or sample", op.as_str()),
        ));
    }
    let present: Vec<&Dim> = term.dims().iter().filter(|dim| dims.contains(*dim)).collect();
    let dim = match present.as_slice() {
        [] => {
            return Ok(ArgReduced {
                indices: BTreeMap::new(),
                remaining: term.clone(),
            });
        }
        [dim] => (*dim).clone(),
        many => {
            return Err(InterpretError::unsupported(
                "argreduce",
                format!("joint argreduce over {many:?} is not implemented"),
            ));
        }
    };
    let View::Tensor {
        dims: tensor_dims,
        data,
    } = term.view()
    else {
        return Err(InterpretError::unsupported(
            "argreduce",
            format!("{} terms have no dense payload", term.kind()),
        ));
    };

    let Some(axis) = tensor_dims.iter().position(|own| *own == dim) else {
        return Err(TermError::MissingDim {
            dim,
            available: tensor_dims.to_vec(),
        }
        .into());
    };
    let (index, remaining) = backend.argreduce(op, data, axis, key)?;
    let kept: Vec<Dim> = tensor_dims.iter().filter(|own| **own != dim).cloned().collect();
    tracing::debug!(op = op.as_str(), dim = %dim, kept = ?kept, "argreduce");

    let mut indices = BTreeMap::new();
    indices.insert(dim, Term::tensor(kept.clone(), index)?);
    Ok(ArgReduced {
        indices,
        remaining: Term::tensor(kept, remaining)?,
    })
}
