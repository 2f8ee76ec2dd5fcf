use criterion::{Criterion, criterion_group, criterion_main};
use std::rc::Rc;
use tt_core::{Op, TensorValue, Term, dim_set};
use tt_interpreters::{Environment, Pipeline};

fn table(dims: [&str; 2], sizes: [u32; 2]) -> Term {
    let count = (sizes[0] * sizes[1]) as usize;
    let values: Vec<f64> = (0..count).map(|slot| slot as f64 / count as f64).collect();
    let data = TensorValue::from_f64s(sizes.to_vec(), &values).expect("bench table should build");
    Term::tensor(dims, data).expect("bench table should label")
}

fn chain() -> Term {
    Term::finitary(
        Op::Mul,
        vec![
            table(["i", "j"], [8, 6]),
            table(["j", "k"], [6, 6]),
            table(["k", "l"], [6, 8]),
        ],
    )
    .expect("bench chain should build")
    .sum(&dim_set(["j", "k"]))
    .expect("bench reduction should build")
}

fn benchmark_pipeline(c: &mut Criterion) {
    let pipeline = Pipeline::standard(Rc::new(Environment::cpu()));
    let term = chain();

    c.bench_function("pipeline/optimize_chain", |b| {
        b.iter(|| {
            let out = pipeline
                .optimize(&term)
                .expect("optimize benchmark should succeed");
            assert_eq!(out.dims().len(), 2);
        });
    });

    c.bench_function("pipeline/evaluate_chain", |b| {
        b.iter(|| {
            let out = pipeline.run(&term).expect("pipeline benchmark should succeed");
            assert_eq!(out.dims().len(), 2);
        });
    });

    c.bench_function("pipeline/deep_negation_chain", |b| {
        let mut deep = Term::scalar_f64(1.0);
        for _ in 0..2_000 {
            deep = deep.neg().expect("negation should build");
        }
        b.iter(|| {
            let out = pipeline.run(&deep).expect("deep chain should evaluate");
            assert_eq!(out, Term::scalar_f64(1.0));
        });
    });
}

criterion_group!(pipeline_benches, benchmark_pipeline);
criterion_main!(pipeline_benches);
