use std::path::Path;

use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestRunner};
use tt_api::{Engine, EngineConfig, EvalMode};
use tt_conformance::{
    ContractionCase, TensorFixture, check_case, fixture_root, init_test_tracing,
    read_case_bundle, run_case_bundle,
};
use tt_core::{Op, Term, View, dim_set};
use tt_test_utils::{TestMode, run_logged_test};

fn engine(mode: EvalMode) -> Engine {
    Engine::new(EngineConfig {
        mode,
        ..EngineConfig::default()
    })
    .expect("engine should build")
}

fn table(dims: [&str; 2], shape: [u32; 2], values: Vec<f64>) -> TensorFixture {
    TensorFixture {
        dims: dims.iter().map(|dim| (*dim).to_owned()).collect(),
        shape: shape.to_vec(),
        values,
    }
}

#[test]
fn fixture_bundle_matches_both_engines() {
    init_test_tracing();
    let path = fixture_root().join("contraction_cases.v1.json");
    assert!(
        Path::new(&path).exists(),
        "expected fixture bundle at {}",
        path.display()
    );
    let bundle = read_case_bundle(&path).expect("bundle should parse");
    run_logged_test(
        module_path!(),
        "fixture_bundle_matches_both_engines",
        &bundle,
        TestMode::Exact,
        || {
            let report = run_case_bundle(&bundle).map_err(|err| err.to_string())?;
            if report.total_cases != bundle.cases.len() || report.mismatched_cases != 0 {
                return Err(format!("mismatches: {:?}", report.mismatches));
            }
            Ok(bundle.cases.iter().map(|case| case.case_id.clone()).collect())
        },
    );
}

#[test]
fn optimized_chain_has_only_pairwise_steps() {
    let case = ContractionCase {
        case_id: "chain".to_owned(),
        sum_op: Op::Add,
        prod_op: Op::Mul,
        operands: vec![
            table(["i", "j"], [2, 3], vec![1.0; 6]),
            table(["j", "k"], [3, 4], vec![1.0; 12]),
            table(["k", "l"], [4, 2], vec![1.0; 8]),
        ],
        reduce: vec!["j".to_owned(), "k".to_owned()],
        expected: None,
    };
    let term = case.to_term().expect("term");
    let optimized = engine(EvalMode::Pipeline).optimize(&term).expect("optimize");
    assert_eq!(optimized.dim_set(), dim_set(["i", "l"]));

    let mut stack = vec![optimized];
    let mut reductions = 0;
    while let Some(node) = stack.pop() {
        match node.view() {
            View::Finitary { operands, .. } => assert!(operands.len() <= 2, "{node:?}"),
            View::Reduction {
                arg, reduce_dims, ..
            } => {
                reductions += 1;
                assert!(reduce_dims.iter().all(|dim| arg.has_dim(dim)));
            }
            _ => {}
        }
        stack.extend(node.args().iter().cloned());
    }
    assert!(reductions >= 1);
}

fn arb_chain_case() -> impl Strategy<Value = ContractionCase> {
    let values = |count: usize| prop::collection::vec(-2.0_f64..2.0, count);
    (1_u32..4, 1_u32..4, 1_u32..4, 1_u32..4).prop_flat_map(move |(i, j, k, l)| {
        (
            values((i * j) as usize),
            values((j * k) as usize),
            values((k * l) as usize),
        )
            .prop_map(move |(x, y, z)| ContractionCase {
                case_id: format!("chain_{i}x{j}x{k}x{l}"),
                sum_op: Op::Add,
                prod_op: Op::Mul,
                operands: vec![
                    table(["i", "j"], [i, j], x),
                    table(["j", "k"], [j, k], y),
                    table(["k", "l"], [k, l], z),
                ],
                reduce: vec!["j".to_owned(), "k".to_owned()],
                expected: None,
            })
    })
}

#[test]
fn prop_optimizer_agrees_with_direct_evaluation() {
    let eager = engine(EvalMode::Eager);
    let pipeline = engine(EvalMode::Pipeline);
    let mut runner = TestRunner::new(ProptestConfig::with_cases(
        tt_test_utils::property_test_case_count(),
    ));
    runner
        .run(&arb_chain_case(), |case| {
            let dense = check_case(&eager, &pipeline, &case)
                .map_err(|detail| TestCaseError::fail(format!("{}: {detail}", case.case_id)))?;
            // Final free dims are the operand dims minus the eliminated ones.
            prop_assert_eq!(dim_set(dense.dims), dim_set(["i", "l"]));
            Ok(())
        })
        .expect("optimizer equivalence");
}

#[test]
fn prop_final_dims_are_operand_union_minus_reduced() {
    let pool = vec!["i", "j", "k", "l"];
    let strategy = (
        prop::sample::subsequence(pool.clone(), 1..=4),
        prop::sample::subsequence(pool.clone(), 1..=4),
        prop::sample::subsequence(pool.clone(), 0..=4),
    );
    let pipeline = engine(EvalMode::Pipeline);
    let mut runner = TestRunner::new(ProptestConfig::with_cases(
        tt_test_utils::property_test_case_count(),
    ));
    runner
        .run(&strategy, |(left, right, reduce)| {
            let operand = |dims: &[&str]| {
                let shape = vec![2_u32; dims.len()];
                let count = 1_usize << dims.len();
                TensorFixture {
                    dims: dims.iter().map(|dim| (*dim).to_owned()).collect(),
                    shape,
                    values: (0..count).map(|n| n as f64).collect(),
                }
                .to_term()
                .expect("operand")
            };
            let term = Term::finitary(Op::Mul, vec![operand(&left), operand(&right)])
                .expect("combine")
                .sum(&dim_set(reduce.iter().copied()))
                .expect("sum");
            let expected: std::collections::BTreeSet<String> = left
                .iter()
                .chain(&right)
                .filter(|dim| !reduce.contains(*dim))
                .map(|dim| (*dim).to_owned())
                .collect();
            prop_assert_eq!(term.dim_set(), expected.clone());
            let out = pipeline.evaluate(&term).expect("pipeline");
            prop_assert_eq!(out.dim_set(), expected);
            Ok(())
        })
        .expect("free dims");
}
