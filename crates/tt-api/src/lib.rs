#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod errors;

pub use config::{EngineConfig, EvalMode};
pub use engine::Engine;
pub use errors::ApiError;
pub use tt_core::{Dim, DimSet, Domain, Op, Size, TensorValue, Term, TermKind, dim_set};
pub use tt_interpreters::ArgReduced;

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(term: &Term) -> Vec<i64> {
        let tt_core::View::Tensor { data, .. } = term.view() else {
            panic!("expected a tensor, got {term:?}");
        };
        data.elements
            .iter()
            .map(|lit| lit.as_i64().expect("i64 element"))
            .collect()
    }

    #[test]
    fn eager_add_scalar() {
        let engine = Engine::new(EngineConfig::default()).expect("engine");
        let term = Term::scalar_i64(3).add(&Term::scalar_i64(4)).expect("add");
        assert_eq!(engine.evaluate(&term).expect("eval"), Term::scalar_i64(7));
    }

    #[test]
    fn call_binds_a_free_dim() {
        let engine = Engine::new(EngineConfig::default()).expect("engine");
        let row = Term::tensor(
            ["i"],
            TensorValue::from_i64s(vec![3], &[10, 20, 30]).expect("row"),
        )
        .expect("row");
        let picked = row.call([("i", Term::scalar_i64(2))]).expect("call");
        let out = engine.eager(&picked).expect("eval");
        assert!(out.dims().is_empty());
        assert_eq!(ints(&out), vec![30]);
    }

    #[test]
    fn materialize_grid() {
        let engine = Engine::new(EngineConfig::default()).expect("engine");
        let i = Term::variable("i", Size::Discrete(2));
        let j = Term::variable("j", Size::Discrete(3));
        let out = engine
            .materialize(&i.mul(&Term::scalar_i64(10)).expect("mul").add(&j).expect("add"))
            .expect("materialize");
        assert_eq!(out.dims(), ["i", "j"]);
        assert_eq!(ints(&out), vec![0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn argmax_picks_the_largest_entry() {
        let engine = Engine::new(EngineConfig::default()).expect("engine");
        let row = Term::tensor(
            ["i"],
            TensorValue::from_i64s(vec![4], &[3, 9, 1, 2]).expect("row"),
        )
        .expect("row");
        let found = engine
            .argreduce(&row, Op::Max, &dim_set(["i"]))
            .expect("argmax");
        assert!(found.indices["i"].dims().is_empty());
        assert_eq!(ints(&found.indices["i"]), vec![1]);
        assert_eq!(ints(&found.remaining), vec![9]);
    }
}
