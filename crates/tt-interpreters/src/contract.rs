//! Open dispatch for binary contractions `sum_op_{dims}(lhs prod_op rhs)`.
//!
//! The generic fallback builds a lazy `Contract` node for any operator pair.
//! Dense handlers for `(add, mul)` and `(logaddexp, add)` lower to the
//! backend einsum. Handlers registered later for an exact signature win
//! over the fallback by specificity.

use std::rc::Rc;

use tt_core::{Dim, DimSet, Op, Term, TermKind};
use tt_dispatch::{DispatchKey, Dispatched, KindPattern, Registry, Signature};
use tt_lax::{EinsumOperand, NumericBackend, SumSemantics};

use crate::InterpretError;
use crate::align::dense;

/// Arguments of one contraction request.
#[derive(Debug, Clone, Copy)]
pub struct ContractRequest<'a> {
    pub sum_op: Op,
    pub prod_op: Op,
    pub lhs: &'a Term,
    pub rhs: &'a Term,
    pub reduce_dims: &'a DimSet,
}

impl ContractRequest<'_> {
    #[must_use]
    pub fn key(&self) -> DispatchKey {
        DispatchKey::new(
            TermKind::Contract,
            [self.sum_op, self.prod_op],
            [self.lhs.kind(), self.rhs.kind()],
        )
    }

    /// Lazy node for this request.
    pub fn reflect(&self) -> Result<Term, InterpretError> {
        Ok(Term::contract(
            self.sum_op,
            self.prod_op,
            self.lhs.clone(),
            self.rhs.clone(),
            self.reduce_dims.clone(),
        )?)
    }
}

pub type ContractHandler =
    dyn Fn(&ContractRequest<'_>, &dyn NumericBackend) -> Result<Option<Term>, InterpretError>;

#[derive(Debug)]
pub struct ContractionAlgebra {
    registry: Registry<ContractHandler>,
}

impl Default for ContractionAlgebra {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ContractionAlgebra {
    /// No handlers at all; every request fails with `NoHandler`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            registry: Registry::new("contract"),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let algebra = Self::empty();
        algebra.register(
            Signature::new(TermKind::Contract).operands([KindPattern::Any, KindPattern::Any]),
            |request, _| request.reflect().map(Some),
        );
        for (sum_op, prod_op, semantics) in [
            (Op::Add, Op::Mul, SumSemantics::Standard),
            (Op::LogAddExp, Op::Add, SumSemantics::LogDomain),
        ] {
            for lhs in [TermKind::Number, TermKind::Tensor] {
                for rhs in [TermKind::Number, TermKind::Tensor] {
                    algebra.register(
                        Self::signature(sum_op, prod_op, lhs, rhs),
                        move |request, backend| dense_einsum(request, backend, semantics),
                    );
                }
            }
        }
        algebra
    }

    /// Exact signature for an operator pair and operand kinds.
    #[must_use]
    pub fn signature(sum_op: Op, prod_op: Op, lhs: TermKind, rhs: TermKind) -> Signature {
        Signature::new(TermKind::Contract)
            .ops([sum_op, prod_op])
            .operands([KindPattern::Exact(lhs), KindPattern::Exact(rhs)])
    }

    pub fn register<F>(&self, signature: Signature, handler: F)
    where
        F: Fn(&ContractRequest<'_>, &dyn NumericBackend) -> Result<Option<Term>, InterpretError>
            + 'static,
    {
        self.registry.register(signature, Rc::new(handler));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn contract(
        &self,
        backend: &dyn NumericBackend,
        sum_op: Op,
        prod_op: Op,
        lhs: &Term,
        rhs: &Term,
        reduce_dims: &DimSet,
    ) -> Result<Term, InterpretError> {
        let request = ContractRequest {
            sum_op,
            prod_op,
            lhs,
            rhs,
            reduce_dims,
        };
        let key = request.key();
        match self
            .registry
            .dispatch(&key, |handler| handler(&request, backend))?
        {
            Dispatched::Handled(term) => Ok(term),
            Dispatched::Declined | Dispatched::NoHandler => Err(InterpretError::NoHandler {
                registry: self.registry.name(),
                key: key.to_string(),
            }),
        }
    }
}

fn dense_einsum(
    request: &ContractRequest<'_>,
    backend: &dyn NumericBackend,
    semantics: SumSemantics,
) -> Result<Option<Term>, InterpretError> {
    let (Some(lhs), Some(rhs)) = (dense(request.lhs), dense(request.rhs)) else {
        return Ok(None);
    };
    let mut output: Vec<Dim> = Vec::new();
    for dim in lhs.dims.iter().chain(rhs.dims) {
        if !request.reduce_dims.contains(dim) && !output.contains(dim) {
            output.push(dim.clone());
        }
    }
    let value = backend.einsum(
        &[
            EinsumOperand {
                labels: lhs.dims,
                value: &lhs.value,
            },
            EinsumOperand {
                labels: rhs.dims,
                value: &rhs.value,
            },
        ],
        &output,
        semantics,
    )?;
    Ok(Some(Term::tensor(output, value)?))
}
