//! Eager evaluation: concrete operands are computed by the backend; anything
//! with a lazy operand declines and stays reflected.

use rustc_hash::FxHashMap;
use tt_core::{Dim, Op, Size, Term, TermId, TermKind, TensorValue, View};
use tt_dispatch::{KindPattern, Signature};

use crate::align::{align_dense, dense, wrap};
use crate::interpreter::{Ctx, Stage};
use crate::InterpretError;

const CONCRETE: [TermKind; 2] = [TermKind::Number, TermKind::Tensor];

type Outcome = Result<Option<Term>, InterpretError>;

#[must_use]
pub fn eager_stage() -> Stage {
    let stage = Stage::new("eager");
    for kind in CONCRETE {
        stage.register(
            Signature::new(TermKind::Unary).operands([KindPattern::Exact(kind)]),
            eager_unary,
        );
        for other in CONCRETE {
            stage.register(
                Signature::new(TermKind::Binary)
                    .operands([KindPattern::Exact(kind), KindPattern::Exact(other)]),
                eager_binary,
            );
        }
    }
    stage.register(
        Signature::new(TermKind::Finitary).variadic(KindPattern::Any),
        eager_finitary,
    );
    stage.register(
        Signature::new(TermKind::Reduction).operands([KindPattern::Exact(TermKind::Tensor)]),
        eager_reduction,
    );
    stage.register(
        Signature::new(TermKind::Align).operands([KindPattern::Exact(TermKind::Tensor)]),
        eager_align,
    );
    stage.register(Signature::new(TermKind::Substitution), eager_substitution);
    stage.register(
        Signature::new(TermKind::Contract).operands([KindPattern::Any, KindPattern::Any]),
        eager_contract,
    );
    stage
}

fn unary_dense(ctx: &Ctx<'_>, op: Op, arg: &Term) -> Outcome {
    let Some(x) = dense(arg) else {
        return Ok(None);
    };
    let value = ctx.backend().unary(op, &x.value)?;
    wrap(x.dims.to_vec(), value, x.scalar).map(Some)
}

/// Left fold of `op` over named-dim-aligned operands.
fn combine_dense(ctx: &Ctx<'_>, op: Op, operands: &[Term]) -> Outcome {
    let Some(parts) = operands.iter().map(dense).collect::<Option<Vec<_>>>() else {
        return Ok(None);
    };
    let scalar = parts.iter().all(|part| part.scalar);
    let (dims, values) = align_dense(ctx.backend(), &parts)?;
    let mut values = values.into_iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    let combined = values.try_fold(first, |acc, next| ctx.backend().binary(op, &acc, &next))?;
    wrap(dims, combined, scalar).map(Some)
}

fn eager_unary(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    match term.view() {
        View::Unary { op, arg } => unary_dense(ctx, op, arg),
        _ => Ok(None),
    }
}

fn eager_binary(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    match term.view() {
        View::Binary { op, lhs, rhs } => combine_dense(ctx, op, &[lhs.clone(), rhs.clone()]),
        _ => Ok(None),
    }
}

fn eager_finitary(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    let View::Finitary { op, operands } = term.view() else {
        return Ok(None);
    };
    match operands {
        [single] if op.is_unary() => unary_dense(ctx, op, single),
        [single] => Ok(Some(single.clone())),
        _ => combine_dense(ctx, op, operands),
    }
}

fn eager_reduction(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    let View::Reduction {
        op,
        arg,
        reduce_dims,
    } = term.view()
    else {
        return Ok(None);
    };
    let View::Tensor { dims, data } = arg.view() else {
        return Ok(None);
    };
    let axes: Vec<usize> = dims
        .iter()
        .enumerate()
        .filter(|(_, dim)| reduce_dims.contains(*dim))
        .map(|(axis, _)| axis)
        .collect();
    let kept: Vec<Dim> = dims
        .iter()
        .filter(|dim| !reduce_dims.contains(*dim))
        .cloned()
        .collect();
    let value = ctx.backend().reduce(op, data, &axes)?;
    Ok(Some(Term::tensor(kept, value)?))
}

fn eager_align(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    let View::Align {
        arg,
        dims: target,
        shape,
    } = term.view()
    else {
        return Ok(None);
    };
    let View::Tensor { dims, data } = arg.view() else {
        return Ok(None);
    };
    // Broadcasting to a continuous dim has no dense form.
    let Some(sizes) = shape
        .iter()
        .map(|size| size.cardinality())
        .collect::<Option<Vec<u32>>>()
    else {
        return Ok(None);
    };

    let mut permutation: Vec<usize> = (0..dims.len()).collect();
    permutation.sort_by_key(|axis| target.iter().position(|dim| *dim == dims[*axis]));
    let permuted = ctx.backend().permute(data, &permutation)?;
    let padded: Vec<u32> = target
        .iter()
        .zip(&sizes)
        .map(|(dim, size)| if dims.contains(dim) { *size } else { 1 })
        .collect();
    let reshaped = if padded.len() == permuted.rank() {
        permuted
    } else {
        ctx.backend().reshape(&permuted, &padded)?
    };
    let expanded = ctx.backend().expand(&reshaped, &sizes)?;
    Ok(Some(Term::tensor(target.to_vec(), expanded)?))
}

fn eager_contract(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    let View::Contract {
        sum_op,
        prod_op,
        lhs,
        rhs,
        reduce_dims,
    } = term.view()
    else {
        return Ok(None);
    };
    let out = ctx
        .contraction()
        .contract(ctx.backend(), sum_op, prod_op, lhs, rhs, reduce_dims)?;
    Ok((out != *term).then_some(out))
}

// ── Substitution ───────────────────────────────────────────────────

fn eager_substitution(term: &Term, ctx: &Ctx<'_>) -> Outcome {
    let View::Substitution { arg, dims, values } = term.view() else {
        return Ok(None);
    };
    match arg.view() {
        View::Number(_) => Ok(Some(arg.clone())),
        View::Variable { name, .. } => Ok(dims
            .iter()
            .position(|dim| dim == name)
            .map(|slot| values[slot].clone())),
        View::Tensor {
            dims: tensor_dims,
            data,
        } => substitute_tensor(ctx, tensor_dims, data, dims, values),
        _ => {
            let subs: Vec<(Dim, Term)> = dims.iter().cloned().zip(values.iter().cloned()).collect();
            let pushed = push_down(arg, &subs)?;
            tracing::trace!(term = %term.id(), pushed = %pushed.id(), "pushed substitution down");
            ctx.reinterpret(&pushed).map(Some)
        }
    }
}

/// Replacement values must not share dims: binding `i` and `j` to terms
/// that both carry `k` would need a diagonal.
fn check_disjoint_values(values: &[Term]) -> Result<(), InterpretError> {
    for (slot, value) in values.iter().enumerate() {
        for dim in value.dims() {
            if values[slot + 1..].iter().any(|later| later.has_dim(dim)) {
                return Err(InterpretError::unsupported(
                    "substitution",
                    format!("replacement values share dim `{dim}`"),
                ));
            }
        }
    }
    Ok(())
}

fn substitute_tensor(
    ctx: &Ctx<'_>,
    tensor_dims: &[Dim],
    data: &TensorValue,
    bound: &[Dim],
    values: &[Term],
) -> Outcome {
    let indexable = values.iter().all(|value| {
        matches!(
            value.kind(),
            TermKind::Number | TermKind::Tensor | TermKind::Variable
        )
    });
    if !indexable {
        return Ok(None);
    }
    check_disjoint_values(values)?;

    let mut dims = tensor_dims.to_vec();
    let mut data = data.clone();
    // Bindings are stored in axis order; working from the last axis keeps
    // earlier axis positions stable while axes are replaced.
    for (dim, value) in bound.iter().zip(values).rev() {
        let Some(axis) = tensor_dims.iter().position(|own| own == dim) else {
            return Err(tt_core::TermError::MissingDim {
                dim: dim.clone(),
                available: tensor_dims.to_vec(),
            }
            .into());
        };
        match value.view() {
            View::Number(literal) => {
                data = ctx
                    .backend()
                    .gather(&data, axis, &TensorValue::scalar(literal))?;
                dims.remove(axis);
            }
            View::Tensor {
                dims: index_dims,
                data: index,
            } => {
                data = ctx.backend().gather(&data, axis, index)?;
                dims.splice(axis..=axis, index_dims.iter().cloned());
            }
            View::Variable { name, size } => {
                if size != Size::Discrete(data.shape.dims[axis]) {
                    return Err(InterpretError::unsupported(
                        "substitution",
                        format!("renaming `{dim}` to `{name}` changes its size to {size}"),
                    ));
                }
                dims[axis] = name.to_owned();
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(Term::tensor(dims, data)?))
}

/// Indices into the substitution list that are in scope at one node.
type Scope = Vec<usize>;

fn scope_of(term: &Term, outer: &[usize], subs: &[(Dim, Term)]) -> Scope {
    outer
        .iter()
        .copied()
        .filter(|slot| term.has_dim(&subs[*slot].0))
        .collect()
}

fn bound(scope: &[usize], subs: &[(Dim, Term)]) -> Vec<(Dim, Term)> {
    scope.iter().map(|slot| subs[*slot].clone()).collect()
}

fn check_capture(
    subs: &[(Dim, Term)],
    reduce_dims: &tt_core::DimSet,
) -> Result<(), InterpretError> {
    for (dim, value) in subs {
        if let Some(captured) = value.dims().iter().find(|d| reduce_dims.contains(*d)) {
            return Err(InterpretError::unsupported(
                "substitution",
                format!("value bound to `{dim}` mentions reduced dim `{captured}`"),
            ));
        }
    }
    Ok(())
}

/// Children the push-down descends into. A nested substitution keeps its
/// own target as a leaf and only has its values rewritten.
fn walked_args(term: &Term) -> &[Term] {
    match term.kind() {
        TermKind::Variable | TermKind::Number | TermKind::Tensor => &[],
        TermKind::Substitution => &term.args()[1..],
        _ => term.args(),
    }
}

/// Moves a substitution below every lazy node of `arg`, so each concrete
/// leaf ends up under its own substitution. Uses an explicit stack; the
/// result still has to be evaluated.
fn push_down(arg: &Term, subs: &[(Dim, Term)]) -> Result<Term, InterpretError> {
    let everything: Scope = (0..subs.len()).collect();
    let root_scope = scope_of(arg, &everything, subs);
    let mut done: FxHashMap<(TermId, Scope), Term> = FxHashMap::default();
    let mut stack = vec![(arg.clone(), root_scope.clone(), false)];
    while let Some((term, scope, children_done)) = stack.pop() {
        let key = (term.id(), scope);
        if done.contains_key(&key) {
            continue;
        }
        if key.1.is_empty() {
            done.insert(key, term);
            continue;
        }
        if children_done {
            let rebuilt = rebind(&term, &key.1, subs, &done)?;
            done.insert(key, rebuilt);
            continue;
        }
        let children: Vec<(Term, Scope)> = walked_args(&term)
            .iter()
            .map(|child| (child.clone(), scope_of(child, &key.1, subs)))
            .collect();
        stack.push((term, key.1, true));
        stack.extend(
            children
                .into_iter()
                .map(|(child, scope)| (child, scope, false)),
        );
    }
    let root = (arg.id(), root_scope);
    done.remove(&root).ok_or_else(|| InterpretError::Driver {
        detail: format!("substitution push-down lost its root {}", arg.id()),
    })
}

/// Rebuilds one node over children that were already pushed through.
fn rebind(
    term: &Term,
    scope: &[usize],
    subs: &[(Dim, Term)],
    done: &FxHashMap<(TermId, Scope), Term>,
) -> Result<Term, InterpretError> {
    let pushed = |child: &Term| -> Result<Term, InterpretError> {
        done.get(&(child.id(), scope_of(child, scope, subs)))
            .cloned()
            .ok_or_else(|| InterpretError::Driver {
                detail: format!("child {} rebuilt out of order", child.id()),
            })
    };
    let here = bound(scope, subs);
    let rebuilt = match term.view() {
        View::Variable { name, .. } => here
            .into_iter()
            .find(|(dim, _)| dim == name)
            .map_or_else(|| term.clone(), |(_, value)| value),
        View::Number(_) => term.clone(),
        View::Tensor { .. } => Term::substitution(term.clone(), here)?,
        View::Unary { op, arg } => Term::unary(op, pushed(arg)?)?,
        View::Binary { op, lhs, rhs } => Term::binary(op, pushed(lhs)?, pushed(rhs)?)?,
        View::Finitary { op, operands } => Term::finitary(
            op,
            operands
                .iter()
                .map(pushed)
                .collect::<Result<Vec<_>, _>>()?,
        )?,
        View::Reduction {
            op,
            arg,
            reduce_dims,
        } => {
            check_capture(&here, reduce_dims)?;
            Term::reduction(op, pushed(arg)?, reduce_dims.clone())?
        }
        View::Contract {
            sum_op,
            prod_op,
            lhs,
            rhs,
            reduce_dims,
        } => {
            check_capture(&here, reduce_dims)?;
            Term::contract(
                sum_op,
                prod_op,
                pushed(lhs)?,
                pushed(rhs)?,
                reduce_dims.clone(),
            )?
        }
        View::Substitution {
            arg: inner,
            dims: inner_bound,
            values,
        } => {
            // Compose: rewrite the inner values, and bind the outer subs
            // that reach the inner target's retained dims alongside them.
            let mut composed: Vec<(Dim, Term)> = inner_bound
                .iter()
                .zip(values)
                .map(|(dim, value)| Ok((dim.clone(), pushed(value)?)))
                .collect::<Result<_, InterpretError>>()?;
            composed.extend(
                here.iter()
                    .filter(|(dim, _)| inner.has_dim(dim) && !inner_bound.contains(dim))
                    .cloned(),
            );
            Term::substitution(inner.clone(), composed)?
        }
        View::Align {
            arg: inner,
            dims,
            shape,
        } => {
            let substituted = pushed(inner)?;
            let mut order: Vec<Dim> = Vec::new();
            let mut sizes: Vec<Size> = Vec::new();
            for (dim, size) in dims.iter().zip(shape) {
                if !here.iter().any(|(name, _)| name == dim) {
                    order.push(dim.clone());
                    sizes.push(*size);
                }
            }
            // Values bound to broadcast-only dims still contribute their dims.
            let mut extra = substituted.schema();
            for (dim, value) in &here {
                if !inner.has_dim(dim) {
                    extra.extend_from(&value.schema())?;
                }
            }
            for (dim, size) in extra.iter() {
                if !order.iter().any(|known| known == dim) {
                    order.push(dim.to_owned());
                    sizes.push(size);
                }
            }
            Term::aligned(substituted, order, sizes)?
        }
    };
    Ok(rebuilt)
}
