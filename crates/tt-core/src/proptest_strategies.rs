//! Random well-formed terms for property tests.

use proptest::prelude::*;

use crate::{DType, Literal, Op, Shape, Size, TensorValue, Term, dim_set};

/// Dimension pool with fixed sizes so random combinations never conflict.
pub const DIM_POOL: [(&str, u32); 4] = [("i", 2), ("j", 3), ("k", 2), ("l", 4)];

pub fn arb_literal() -> impl Strategy<Value = Literal> {
    prop_oneof![
        (-8_i64..8).prop_map(Literal::I64),
        any::<bool>().prop_map(Literal::Bool),
        (-4.0_f64..4.0).prop_map(Literal::from_f64),
    ]
}

pub fn arb_dim() -> impl Strategy<Value = (&'static str, u32)> {
    prop::sample::select(DIM_POOL.to_vec())
}

/// Dense tensor over a subset of the pool, in pool order.
pub fn arb_tensor_term() -> impl Strategy<Value = Term> {
    prop::sample::subsequence(DIM_POOL.to_vec(), 0..=2).prop_flat_map(|dims| {
        let count: usize = dims.iter().map(|(_, n)| *n as usize).product();
        prop::collection::vec(-3.0_f64..3.0, count).prop_map(move |values| {
            let shape = Shape {
                dims: dims.iter().map(|(_, n)| *n).collect(),
            };
            let data = TensorValue::new(
                DType::F64,
                shape,
                values.into_iter().map(Literal::from_f64).collect(),
            )
            .expect("strategy builds consistent tensors");
            Term::tensor(dims.iter().map(|(name, _)| *name), data)
                .expect("pool dims are unique")
        })
    })
}

pub fn arb_leaf() -> impl Strategy<Value = Term> {
    prop_oneof![
        arb_dim().prop_map(|(name, n)| Term::variable(name, Size::Discrete(n))),
        arb_literal().prop_map(Term::number),
        arb_tensor_term(),
    ]
}

pub fn arb_term() -> impl Strategy<Value = Term> {
    arb_leaf().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            inner
                .clone()
                .prop_map(|term| term.neg().expect("neg is unary")),
            (inner.clone(), inner.clone(), prop::sample::select(vec![Op::Add, Op::Mul]))
                .prop_map(|(lhs, rhs, op)| lhs.combine(op, &rhs).expect("pool sizes agree")),
            prop::collection::vec(inner.clone(), 1..4)
                .prop_map(|operands| Term::finitary(Op::Add, operands).expect("non-empty")),
            (inner.clone(), prop::sample::subsequence(vec!["i", "j", "k", "l"], 1..3))
                .prop_map(|(term, dims)| term.sum(&dim_set(dims)).expect("sum")),
            inner.prop_map(|term| {
                if term.has_dim("i") {
                    term.call([("i", Term::scalar_i64(1))]).expect("bind i")
                } else {
                    term
                }
            }),
        ]
    })
}
