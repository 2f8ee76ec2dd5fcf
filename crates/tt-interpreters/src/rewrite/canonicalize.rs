use tt_core::{DimSet, Op, Term, TermKind, View};
use tt_dispatch::{KindPattern, Signature};

use crate::InterpretError;
use crate::interpreter::{Ctx, Stage};

/// Normal form for `Finitary` nodes: nested same-op combines are flattened
/// and combines of reductions are lifted into one reduction.
#[must_use]
pub fn canonicalize_stage() -> Stage {
    let stage = Stage::new("canonicalize");
    stage.register(
        Signature::new(TermKind::Finitary).variadic(KindPattern::Any),
        canonicalize_finitary,
    );
    stage
}

fn canonicalize_finitary(term: &Term, ctx: &Ctx<'_>) -> Result<Option<Term>, InterpretError> {
    let View::Finitary { op, operands } = term.view() else {
        return Ok(None);
    };
    if operands.len() < 2 {
        return Ok(None);
    }
    let reductions = operands
        .iter()
        .filter(|operand| operand.kind() == TermKind::Reduction)
        .count();
    if reductions == 0 {
        return flatten(op, operands);
    }
    if reductions < operands.len() {
        return Err(InterpretError::unsupported(
            "canonicalize",
            format!(
                "{} combine mixes {reductions} reductions with {} other operands",
                op.as_str(),
                operands.len() - reductions
            ),
        ));
    }
    merge_reductions(ctx, op, operands).map(Some)
}

fn flatten(op: Op, operands: &[Term]) -> Result<Option<Term>, InterpretError> {
    let nested = |operand: &Term| {
        matches!(operand.view(), View::Finitary { op: inner, .. } if inner == op)
    };
    if !op.is_associative() || !operands.iter().any(nested) {
        return Ok(None);
    }
    let mut flat = Vec::with_capacity(operands.len() + 1);
    for operand in operands {
        match operand.view() {
            View::Finitary {
                op: inner,
                operands: children,
            } if inner == op => flat.extend(children.iter().cloned()),
            _ => flat.push(operand.clone()),
        }
    }
    tracing::debug!(
        op = op.as_str(),
        from = operands.len(),
        to = flat.len(),
        "flattened combine"
    );
    Ok(Some(Term::finitary(op, flat)?))
}

/// `op(R_r(a; A), R_r(b; B))` → `R_r(op(a, b); A ∪ B)`, valid only when `op`
/// distributes over `r` and no operand's reduced dims appear in another.
fn merge_reductions(ctx: &Ctx<'_>, op: Op, operands: &[Term]) -> Result<Term, InterpretError> {
    let mut reduce_op = None;
    let mut parts: Vec<(&Term, &DimSet)> = Vec::with_capacity(operands.len());
    for operand in operands {
        let View::Reduction {
            op: inner_op,
            arg,
            reduce_dims,
        } = operand.view()
        else {
            continue;
        };
        match reduce_op {
            None => reduce_op = Some(inner_op),
            Some(seen) if seen != inner_op => {
                return Err(InterpretError::unsupported(
                    "canonicalize",
                    format!(
                        "cannot merge {} and {} reductions",
                        seen.as_str(),
                        inner_op.as_str()
                    ),
                ));
            }
            Some(_) => {}
        }
        parts.push((arg, reduce_dims));
    }
    let Some(reduce_op) = reduce_op else {
        return Err(InterpretError::unsupported(
            "canonicalize",
            "no reductions to merge",
        ));
    };
    if !op.distributes_over(reduce_op) {
        return Err(InterpretError::unsupported(
            "canonicalize",
            format!(
                "{} does not distribute over {}",
                op.as_str(),
                reduce_op.as_str()
            ),
        ));
    }
    for (slot, (_, reduced)) in parts.iter().enumerate() {
        for (other_slot, (other_arg, _)) in parts.iter().enumerate() {
            if slot == other_slot {
                continue;
            }
            if let Some(dim) = reduced.iter().find(|dim| other_arg.has_dim(dim)) {
                return Err(InterpretError::unsupported(
                    "canonicalize",
                    format!("reduced dim `{dim}` is shared between operands"),
                ));
            }
        }
    }

    let mut all_reduced = DimSet::new();
    let mut inner = Vec::with_capacity(parts.len());
    for (arg, reduced) in parts {
        all_reduced.extend(reduced.iter().cloned());
        inner.push(arg.clone());
    }
    tracing::debug!(
        op = op.as_str(),
        reduce = reduce_op.as_str(),
        dims = ?all_reduced,
        "merged sibling reductions"
    );
    // The merged combine may itself need flattening.
    let combined = ctx.revisit(Term::finitary(op, inner)?)?;
    Ok(Term::reduction(reduce_op, combined, all_reduced)?)
}
