#![forbid(unsafe_code)]

//! Fixture bundles of sum-product contractions, run through both the eager
//! and the pipeline engines and compared against each other and against
//! recorded expectations.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use tt_api::{ApiError, Engine, EngineConfig, EvalMode};
use tt_core::{Dim, Op, TensorValue, Term, View};

pub const CASE_BUNDLE_SCHEMA_VERSION: &str = "tensorterm.contraction-cases.v1";

const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, once per process.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[must_use]
pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Dense `f64` table over named dims, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorFixture {
    pub dims: Vec<Dim>,
    pub shape: Vec<u32>,
    pub values: Vec<f64>,
}

impl TensorFixture {
    pub fn to_term(&self) -> Result<Term, ApiError> {
        let data = TensorValue::from_f64s(self.shape.clone(), &self.values).map_err(|err| {
            ApiError::Config {
                detail: format!("fixture tensor: {err}"),
            }
        })?;
        Ok(Term::tensor(self.dims.clone(), data)?)
    }

    /// Reads back a dense result. Numbers become 0-d tables.
    #[must_use]
    pub fn from_term(term: &Term) -> Option<Self> {
        match term.view() {
            View::Number(literal) => Some(Self {
                dims: Vec::new(),
                shape: Vec::new(),
                values: vec![literal.as_f64()?],
            }),
            View::Tensor { dims, data } => Some(Self {
                dims: dims.to_vec(),
                shape: data.shape.dims.clone(),
                values: data
                    .elements
                    .iter()
                    .map(|lit| lit.as_f64())
                    .collect::<Option<Vec<_>>>()?,
            }),
            _ => None,
        }
    }

    /// Same table with its axes reordered to `order`.
    #[must_use]
    pub fn permuted(&self, order: &[Dim]) -> Option<Self> {
        if order.len() != self.dims.len() {
            return None;
        }
        let axes: Vec<usize> = order
            .iter()
            .map(|dim| self.dims.iter().position(|own| own == dim))
            .collect::<Option<Vec<_>>>()?;
        let mut strides = vec![1_usize; self.shape.len()];
        for axis in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.shape[axis + 1] as usize;
        }
        let shape: Vec<u32> = axes.iter().map(|&axis| self.shape[axis]).collect();
        let mut index = vec![0_u32; shape.len()];
        let mut values = Vec::with_capacity(self.values.len());
        for _ in 0..self.values.len() {
            let offset: usize = index
                .iter()
                .zip(&axes)
                .map(|(&i, &axis)| i as usize * strides[axis])
                .sum();
            values.push(*self.values.get(offset)?);
            for pos in (0..index.len()).rev() {
                index[pos] += 1;
                if index[pos] < shape[pos] {
                    break;
                }
                index[pos] = 0;
            }
        }
        Some(Self {
            dims: order.to_vec(),
            shape,
            values,
        })
    }

    /// Equal up to axis order, with an absolute-or-relative tolerance.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        let Some(other) = other.permuted(&self.dims) else {
            return false;
        };
        self.shape == other.shape
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| close(*a, *b, tolerance))
    }
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tolerance * scale
}

/// `sum_op` over `reduce` of the `prod_op` combination of all operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractionCase {
    pub case_id: String,
    pub sum_op: Op,
    pub prod_op: Op,
    pub operands: Vec<TensorFixture>,
    pub reduce: Vec<Dim>,
    #[serde(default)]
    pub expected: Option<TensorFixture>,
}

impl ContractionCase {
    pub fn to_term(&self) -> Result<Term, ApiError> {
        let operands = self
            .operands
            .iter()
            .map(TensorFixture::to_term)
            .collect::<Result<Vec<_>, _>>()?;
        let combined = Term::finitary(self.prod_op, operands)?;
        let dims = tt_core::dim_set(self.reduce.iter().cloned());
        Ok(Term::reduction(self.sum_op, combined, dims)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBundle {
    pub schema_version: String,
    pub cases: Vec<ContractionCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMismatch {
    pub case_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReport {
    pub total_cases: usize,
    pub matched_cases: usize,
    pub mismatched_cases: usize,
    pub mismatches: Vec<CaseMismatch>,
}

pub fn read_case_bundle(path: &Path) -> Result<CaseBundle, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("read {}: {err}", path.display()))?;
    let bundle: CaseBundle =
        serde_json::from_str(&raw).map_err(|err| format!("parse {}: {err}", path.display()))?;
    if bundle.schema_version != CASE_BUNDLE_SCHEMA_VERSION {
        return Err(format!(
            "unexpected schema version {:?}",
            bundle.schema_version
        ));
    }
    Ok(bundle)
}

/// Evaluates `case` eagerly and through the pipeline and checks both
/// against each other and the recorded expectation.
pub fn check_case(
    eager: &Engine,
    pipeline: &Engine,
    case: &ContractionCase,
) -> Result<TensorFixture, String> {
    let term = case.to_term().map_err(|err| err.to_string())?;
    let dense = |engine: &Engine| -> Result<TensorFixture, String> {
        let out = engine.evaluate(&term).map_err(|err| err.to_string())?;
        TensorFixture::from_term(&out).ok_or_else(|| format!("result is not dense: {out:?}"))
    };
    let direct = dense(eager)?;
    let optimized = dense(pipeline)?;
    if !direct.approx_eq(&optimized, DEFAULT_TOLERANCE) {
        return Err(format!(
            "pipeline result {optimized:?} differs from eager {direct:?}"
        ));
    }
    if let Some(expected) = &case.expected
        && !expected.approx_eq(&direct, DEFAULT_TOLERANCE)
    {
        return Err(format!("expected {expected:?}, got {direct:?}"));
    }
    Ok(direct)
}

pub fn run_case_bundle(bundle: &CaseBundle) -> Result<BundleReport, ApiError> {
    let eager = Engine::new(EngineConfig {
        mode: EvalMode::Eager,
        ..EngineConfig::default()
    })?;
    let pipeline = Engine::new(EngineConfig {
        mode: EvalMode::Pipeline,
        ..EngineConfig::default()
    })?;
    let mut mismatches = Vec::new();
    for case in &bundle.cases {
        if let Err(detail) = check_case(&eager, &pipeline, case) {
            tracing::warn!(case = %case.case_id, %detail, "conformance mismatch");
            mismatches.push(CaseMismatch {
                case_id: case.case_id.clone(),
                detail,
            });
        }
    }
    Ok(BundleReport {
        total_cases: bundle.cases.len(),
        matched_cases: bundle.cases.len() - mismatches.len(),
        mismatched_cases: mismatches.len(),
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::{TensorFixture, close};

    fn table() -> TensorFixture {
        TensorFixture {
            dims: vec!["i".into(), "j".into()],
            shape: vec![2, 3],
            values: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        }
    }

    #[test]
    fn permuting_transposes_row_major_data() {
        let swapped = table()
            .permuted(&["j".to_owned(), "i".to_owned()])
            .expect("permute");
        assert_eq!(swapped.shape, vec![3, 2]);
        assert_eq!(swapped.values, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(table().approx_eq(&swapped, 0.0));
    }

    #[test]
    fn mismatched_dims_are_not_equal() {
        let mut other = table();
        other.dims = vec!["i".into(), "k".into()];
        assert!(!table().approx_eq(&other, 1e-9));
        assert!(table().permuted(&["i".to_owned()]).is_none());
    }

    #[test]
    fn tolerance_is_relative_for_large_values() {
        assert!(close(1e12, 1e12 + 1.0, 1e-9));
        assert!(!close(1.0, 1.1, 1e-9));
    }
}
