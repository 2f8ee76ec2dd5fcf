use tt_core::{DType, Dim, Literal, Shape, TensorValue};

use crate::arithmetic::logaddexp;
use crate::layout::{compute_strides, element_count, unravel};
use crate::{EinsumOperand, EvalError, SumSemantics};

/// Dense einsum by direct enumeration of every label assignment.
///
/// Labels absent from `output` are summed out (or log-sum-exp'd in the log
/// domain). Output labels must each appear in some operand.
pub(crate) fn einsum(
    operands: &[EinsumOperand<'_>],
    output: &[Dim],
    semantics: SumSemantics,
) -> Result<TensorValue, EvalError> {
    let mut labels: Vec<&Dim> = Vec::new();
    let mut sizes: Vec<u32> = Vec::new();
    for operand in operands {
        if operand.labels.len() != operand.value.rank() {
            return Err(EvalError::Unsupported {
                operation: "einsum",
                detail: format!(
                    "{} labels for a rank-{} operand",
                    operand.labels.len(),
                    operand.value.rank()
                ),
            });
        }
        for (label, size) in operand.labels.iter().zip(&operand.value.shape.dims) {
            match labels.iter().position(|known| *known == label) {
                Some(slot) if sizes[slot] != *size => {
                    return Err(EvalError::LabelMismatch {
                        label: label.clone(),
                        left: sizes[slot],
                        right: *size,
                    });
                }
                Some(_) => {}
                None => {
                    labels.push(label);
                    sizes.push(*size);
                }
            }
        }
    }

    let slot_of = |label: &Dim| labels.iter().position(|known| *known == label);
    let output_slots = output
        .iter()
        .map(|label| {
            slot_of(label).ok_or_else(|| EvalError::Unsupported {
                operation: "einsum",
                detail: format!("output label `{label}` appears in no operand"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let out_dims: Vec<u32> = output_slots.iter().map(|slot| sizes[*slot]).collect();
    let out_strides = compute_strides(&out_dims);

    // Per operand: (label slot, stride) pairs and numeric payload.
    let mut plans = Vec::with_capacity(operands.len());
    for operand in operands {
        let strides = compute_strides(&operand.value.shape.dims);
        let mut slots = Vec::with_capacity(operand.labels.len());
        for (label, stride) in operand.labels.iter().zip(strides) {
            let slot = slot_of(label).ok_or_else(|| EvalError::Unsupported {
                operation: "einsum",
                detail: format!("label `{label}` missing from the label table"),
            })?;
            slots.push((slot, stride));
        }
        plans.push((slots, operand.value.to_f64_vec()?));
    }

    let (init, unit) = match semantics {
        SumSemantics::Standard => (0.0, 1.0),
        SumSemantics::LogDomain => (f64::NEG_INFINITY, 0.0),
    };
    let mut acc = vec![init; element_count(&out_dims)];
    let mut assignment = vec![0; labels.len()];
    for flat in 0..element_count(&sizes) {
        unravel(flat, &sizes, &mut assignment);
        let term = plans.iter().fold(unit, |partial, (slots, values)| {
            let offset: usize = slots
                .iter()
                .map(|(slot, stride)| assignment[*slot] * stride)
                .sum();
            match semantics {
                SumSemantics::Standard => partial * values[offset],
                SumSemantics::LogDomain => partial + values[offset],
            }
        });
        let out: usize = output_slots
            .iter()
            .zip(&out_strides)
            .map(|(slot, stride)| assignment[*slot] * stride)
            .sum();
        acc[out] = match semantics {
            SumSemantics::Standard => acc[out] + term,
            SumSemantics::LogDomain => logaddexp(acc[out], term),
        };
    }

    Ok(TensorValue::new(
        DType::F64,
        Shape { dims: out_dims },
        acc.into_iter().map(Literal::from_f64).collect(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::einsum;
    use crate::{EinsumOperand, SumSemantics};
    use tt_core::TensorValue;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn matrix_product() {
        let a = TensorValue::from_f64s(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).expect("a");
        let b = TensorValue::from_f64s(vec![2, 2], &[5.0, 6.0, 7.0, 8.0]).expect("b");
        let (ij, jk, ik) = (labels(&["i", "j"]), labels(&["j", "k"]), labels(&["i", "k"]));
        let out = einsum(
            &[
                EinsumOperand { labels: &ij, value: &a },
                EinsumOperand { labels: &jk, value: &b },
            ],
            &ik,
            SumSemantics::Standard,
        )
        .expect("matmul");
        assert_eq!(out.to_f64_vec().expect("numeric"), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn log_domain_matches_log_of_standard() {
        let a = TensorValue::from_f64s(vec![2, 3], &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).expect("a");
        let b = TensorValue::from_f64s(vec![3], &[0.7, 0.8, 0.9]).expect("b");
        let log_a = TensorValue::from_f64s(
            vec![2, 3],
            &a.to_f64_vec().expect("numeric").iter().map(|v| v.ln()).collect::<Vec<_>>(),
        )
        .expect("log a");
        let log_b = TensorValue::from_f64s(
            vec![3],
            &b.to_f64_vec().expect("numeric").iter().map(|v| v.ln()).collect::<Vec<_>>(),
        )
        .expect("log b");
        let (ij, j, i) = (labels(&["i", "j"]), labels(&["j"]), labels(&["i"]));
        let standard = einsum(
            &[
                EinsumOperand { labels: &ij, value: &a },
                EinsumOperand { labels: &j, value: &b },
            ],
            &i,
            SumSemantics::Standard,
        )
        .expect("standard");
        let log = einsum(
            &[
                EinsumOperand { labels: &ij, value: &log_a },
                EinsumOperand { labels: &j, value: &log_b },
            ],
            &i,
            SumSemantics::LogDomain,
        )
        .expect("log domain");
        for (s, l) in standard
            .to_f64_vec()
            .expect("numeric")
            .iter()
            .zip(log.to_f64_vec().expect("numeric"))
        {
            assert!((s.ln() - l).abs() < 1e-12);
        }
    }

    #[test]
    fn inconsistent_label_sizes_fail() {
        let a = TensorValue::from_f64s(vec![2], &[0.0; 2]).expect("a");
        let b = TensorValue::from_f64s(vec![3], &[0.0; 3]).expect("b");
        let i = labels(&["i"]);
        let result = einsum(
            &[
                EinsumOperand { labels: &i, value: &a },
                EinsumOperand { labels: &i, value: &b },
            ],
            &[],
            SumSemantics::Standard,
        );
        assert!(result.is_err());
    }
}
