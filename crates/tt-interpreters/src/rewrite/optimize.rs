use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tt_core::{Dim, DimSet, Size, Term, TermKind, View};
use tt_dispatch::{KindPattern, Signature};

use super::path::greedy_path;
use crate::InterpretError;
use crate::interpreter::{Ctx, Stage};

/// Sizes used for contraction-path costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    /// Stand-in cardinality for continuous dims.
    pub continuous_size: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self { continuous_size: 2 }
    }
}

impl CostModel {
    #[must_use]
    pub fn size_of(&self, size: Size) -> u64 {
        match size {
            Size::Discrete(n) => u64::from(n),
            Size::Continuous(_) => self.continuous_size,
        }
    }
}

/// Rewrites `Reduction(r, Finitary(c, operands))` into a pairwise
/// contraction sequence along a greedy path.
#[must_use]
pub fn optimize_stage() -> Stage {
    let stage = Stage::new("optimize");
    stage.register(
        Signature::new(TermKind::Reduction).operands([KindPattern::Exact(TermKind::Finitary)]),
        optimize_reduction,
    );
    stage
}

fn optimize_reduction(term: &Term, ctx: &Ctx<'_>) -> Result<Option<Term>, InterpretError> {
    let View::Reduction {
        op: reduce_op,
        arg,
        reduce_dims,
    } = term.view()
    else {
        return Ok(None);
    };
    let View::Finitary {
        op: combine_op,
        operands,
    } = arg.view()
    else {
        return Ok(None);
    };
    if operands.len() < 2 {
        return Ok(None);
    }
    if !combine_op.is_associative() || !combine_op.distributes_over(reduce_op) {
        tracing::debug!(
            combine = combine_op.as_str(),
            reduce = reduce_op.as_str(),
            "not a sum-product; leaving reduction as built"
        );
        return Ok(None);
    }

    let cost_model = ctx.cost_model();
    let sizes: FxHashMap<Dim, u64> = arg
        .schema()
        .iter()
        .map(|(dim, size)| (dim.to_owned(), cost_model.size_of(size)))
        .collect();
    let inputs: Vec<DimSet> = operands.iter().map(Term::dim_set).collect();
    let keep: DimSet = arg
        .dims()
        .iter()
        .filter(|dim| !reduce_dims.contains(*dim))
        .cloned()
        .collect();
    let path = greedy_path(&inputs, &keep, &sizes);
    tracing::debug!(operands = operands.len(), path = ?path, "contraction path");

    // Number of not-yet-combined operands mentioning each reduced dim.
    let mut mentions: BTreeMap<Dim, usize> = reduce_dims
        .iter()
        .map(|dim| {
            let count = inputs.iter().filter(|input| input.contains(dim)).count();
            (dim.clone(), count)
        })
        .collect();

    let mut current: Vec<Term> = operands.to_vec();
    for (step, (a, b)) in path.into_iter().enumerate() {
        let rhs = current.remove(b);
        let lhs = current[a].clone();
        let mut retired = DimSet::new();
        for (dim, count) in &mut mentions {
            let uses = usize::from(lhs.has_dim(dim)) + usize::from(rhs.has_dim(dim));
            if *count == 0 || uses == 0 {
                continue;
            }
            *count = count.saturating_sub(uses);
            if *count == 0 {
                retired.insert(dim.clone());
            } else {
                // The combined operand now mentions it.
                *count += 1;
            }
        }
        tracing::trace!(step, lhs = ?lhs, rhs = ?rhs, retired = ?retired, "contract pair");
        let combined = ctx.forward(Term::finitary(combine_op, vec![lhs, rhs])?)?;
        current[a] = if retired.is_empty() {
            combined
        } else {
            ctx.forward(Term::reduction(reduce_op, combined, retired)?)?
        };
    }

    let Some(result) = current.pop() else {
        return Ok(None);
    };
    let leftover: DimSet = mentions
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(dim, _)| dim)
        .collect();
    Ok(Some(Term::reduction(reduce_op, result, leftover)?))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::{CostModel, optimize_stage};
    use crate::rewrite::{canonicalize_stage, desugar_stage};
    use crate::{Environment, Interpreter};
    use tt_core::{Domain, Op, Size, TensorValue, Term, TermKind, View, dim_set};

    fn rewriter() -> Interpreter {
        Interpreter::new(
            vec![
                Rc::new(desugar_stage()),
                Rc::new(canonicalize_stage()),
                Rc::new(optimize_stage()),
            ],
            Rc::new(Environment::cpu()),
        )
    }

    fn var(name: &str, size: u32) -> Term {
        Term::variable(name, Size::Discrete(size))
    }

    fn table(dims: [&str; 2], sizes: [u32; 2]) -> Term {
        let count = (sizes[0] * sizes[1]) as usize;
        let data = TensorValue::from_f64s(sizes.to_vec(), &vec![1.0; count]).expect("table");
        Term::tensor(dims, data).expect("table")
    }

    #[test]
    fn continuous_dims_use_the_fallback_size() {
        let model = CostModel { continuous_size: 7 };
        assert_eq!(model.size_of(Size::Discrete(3)), 3);
        assert_eq!(model.size_of(Size::Continuous(Domain::Real)), 7);
        assert_eq!(CostModel::default().continuous_size, 2);
    }

    #[test]
    fn chain_product_becomes_nested_pairwise_sums() {
        let x = table(["i", "j"], [2, 3]);
        let y = table(["j", "k"], [3, 4]);
        let z = table(["k", "l"], [4, 5]);
        let term = Term::finitary(Op::Mul, vec![x, y, z])
            .expect("chain")
            .sum(&dim_set(["j", "k"]))
            .expect("sum");
        let out = rewriter().interpret(&term).expect("optimize");
        assert_eq!(out.dim_set(), dim_set(["i", "l"]));

        // Every reduction in the result eliminates dims no sibling needs.
        let mut stack = vec![out];
        let mut reductions = 0;
        while let Some(node) = stack.pop() {
            if let View::Reduction { arg, .. } = node.view() {
                reductions += 1;
                let View::Finitary { operands, .. } = arg.view() else {
                    panic!("reduction over a non-combine: {arg:?}");
                };
                assert!(operands.len() <= 2);
            }
            stack.extend(node.args().iter().cloned());
        }
        assert!(reductions >= 1);
    }

    #[test]
    fn dims_shared_with_pending_operands_are_not_retired_early() {
        // a·b·c where j appears in a and c: the first pair must keep j.
        let a = table(["i", "j"], [2, 2]);
        let b = table(["i", "k"], [2, 9]);
        let c = table(["j", "m"], [2, 2]);
        let term = Term::finitary(Op::Mul, vec![a, b, c])
            .expect("triple")
            .sum(&dim_set(["i", "j", "k", "m"]))
            .expect("sum");
        let out = rewriter().interpret(&term).expect("optimize");
        assert!(out.dims().is_empty());

        let mut stack = vec![out];
        while let Some(node) = stack.pop() {
            if let View::Reduction { arg, reduce_dims, .. } = node.view() {
                for dim in reduce_dims {
                    assert!(arg.has_dim(dim));
                }
            }
            if let View::Finitary { operands, .. } = node.view() {
                // No operand of a combine still hides a dim another operand exposes.
                for operand in operands {
                    if let View::Reduction { reduce_dims, .. } = operand.view() {
                        for other in operands.iter().filter(|o| *o != operand) {
                            assert!(reduce_dims.iter().all(|dim| !other.has_dim(dim)));
                        }
                    }
                }
            }
            stack.extend(node.args().iter().cloned());
        }
    }

    #[test]
    fn non_distributive_pairs_are_left_alone() {
        let term = Term::finitary(Op::Add, vec![var("i", 2), var("j", 3)])
            .expect("sum")
            .reduce(Op::Mul, Some(&dim_set(["i"])))
            .expect("prod");
        let out = rewriter().interpret(&term).expect("optimize");
        assert_eq!(out.kind(), TermKind::Reduction);
        let View::Reduction { arg, .. } = out.view() else {
            unreachable!();
        };
        assert_eq!(arg.kind(), TermKind::Finitary);
    }
}
