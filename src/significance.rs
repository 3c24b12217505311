//! Empirical p-values against a null ensemble.
//!
//! The p-value is the fraction of usable surrogates at least as extreme as
//! the observation. When none (or all) are, the result is a bound
//! (`< 1/N`, `> 1 − 1/N`) rather than 0 or 1. At least two usable null
//! values are required.

use std::fmt;

use tracing::debug;

use crate::error::{NullTestError, Result, Stage};
use crate::nulls::NullEnsemble;

/// Which null values count as "at least as extreme" as the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extremity {
    /// `null ≤ observed`, e.g. a separation for an alignment-tightness test.
    Lower,
    /// `null ≥ observed`.
    Upper,
    /// `|null| ≥ |observed|`, for signed amplitudes.
    AbsUpper,
    /// The smaller of the `Lower` and `Upper` tail fractions.
    TwoSided,
}

/// Empirical p-value, or a bound when the observation lies outside the null
/// range.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PValue {
    Exact(f64),
    /// No null value was as extreme; the p-value is below this.
    Below(f64),
    /// Every null value was as extreme; the p-value is above this.
    Above(f64),
}

impl PValue {
    /// The number itself, or the bound.
    pub fn value(&self) -> f64 {
        match *self {
            PValue::Exact(p) | PValue::Below(p) | PValue::Above(p) => p,
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, PValue::Exact(_))
    }
}

impl fmt::Display for PValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PValue::Exact(p) => write!(f, "{p}"),
            PValue::Below(p) => write!(f, "< {p}"),
            PValue::Above(p) => write!(f, "> {p}"),
        }
    }
}

/// Distribution summary of the null values.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NullSummary {
    pub mean: f64,
    /// Sample standard deviation (n − 1); 0 for a single value.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Percentiles 2.5, 16, 50, 84, 97.5.
    pub percentiles: [f64; 5],
    /// The null values themselves, ascending.
    #[serde(rename = "values", deserialize_with = "ascending_values")]
    sorted: Vec<f64>,
}

fn ascending_values<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut values = <Vec<f64> as serde::Deserialize>::deserialize(deserializer)?;
    if values.is_empty() {
        return Err(serde::de::Error::custom("null summary without values"));
    }
    values.sort_by(f64::total_cmp);
    Ok(values)
}

/// Percentile levels reported in [`NullSummary::percentiles`].
pub const SUMMARY_PERCENTILES: [f64; 5] = [2.5, 16.0, 50.0, 84.0, 97.5];

impl NullSummary {
    pub fn from_values(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(NullTestError::EmptyEnsemble {
                stage: Stage::Significance,
                test: None,
                requested: 0,
                excluded: 0,
            });
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let std = if sorted.len() > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        let mut summary = Self {
            mean,
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            percentiles: [0.0; 5],
            sorted,
        };
        summary.percentiles = SUMMARY_PERCENTILES.map(|q| summary.percentile(q));
        Ok(summary)
    }

    /// Linear-interpolated percentile, `q` in [0, 100].
    pub fn percentile(&self, q: f64) -> f64 {
        let n = self.sorted.len();
        if n == 1 {
            return self.sorted[0];
        }
        let pos = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = pos - lo as f64;
        self.sorted[lo] * (1.0 - frac) + self.sorted[hi] * frac
    }

    /// Fraction of null values strictly below `threshold`.
    pub fn fraction_below(&self, threshold: f64) -> f64 {
        let below = self.sorted.partition_point(|&v| v < threshold);
        below as f64 / self.sorted.len() as f64
    }

    /// Null values in ascending order.
    pub fn values(&self) -> &[f64] {
        &self.sorted
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// Observed value set against its null ensemble. Immutable once built.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SignificanceResult {
    pub observed: f64,
    pub extremity: Extremity,
    pub p_value: PValue,
    /// Surrogates at least as extreme as the observation.
    pub count_as_extreme: usize,
    pub requested_size: usize,
    pub effective_size: usize,
    pub excluded: usize,
    /// Null distribution, values included.
    pub summary: NullSummary,
}

/// Fraction of `nulls` at least as extreme as `observed`, as a count.
fn count_extreme(observed: f64, nulls: &[f64], extremity: Extremity) -> usize {
    let lower = || nulls.iter().filter(|&&v| v <= observed).count();
    let upper = || nulls.iter().filter(|&&v| v >= observed).count();
    match extremity {
        Extremity::Lower => lower(),
        Extremity::Upper => upper(),
        Extremity::AbsUpper => nulls.iter().filter(|&&v| v.abs() >= observed.abs()).count(),
        Extremity::TwoSided => lower().min(upper()),
    }
}

/// p-value of `observed` against raw null values.
pub fn evaluate(observed: f64, nulls: &[f64], extremity: Extremity) -> Result<SignificanceResult> {
    evaluate_counted(observed, nulls, extremity, nulls.len(), 0)
}

/// p-value of `observed` against a null ensemble, keeping its
/// requested/excluded bookkeeping.
pub fn evaluate_ensemble(
    observed: f64,
    ensemble: &NullEnsemble,
    extremity: Extremity,
) -> Result<SignificanceResult> {
    evaluate_counted(
        observed,
        ensemble.values(),
        extremity,
        ensemble.requested(),
        ensemble.excluded_count(),
    )
}

fn evaluate_counted(
    observed: f64,
    nulls: &[f64],
    extremity: Extremity,
    requested: usize,
    excluded: usize,
) -> Result<SignificanceResult> {
    let n = nulls.len();
    if n == 0 {
        return Err(NullTestError::EmptyEnsemble {
            stage: Stage::Significance,
            test: None,
            requested,
            excluded,
        });
    }
    // One value cannot bound a tail: it would report p > 0.
    if n < 2 {
        return Err(NullTestError::input_shape(
            Stage::Significance,
            format!("{n} usable null value; at least 2 are needed for a p-value"),
        ));
    }
    if !observed.is_finite() {
        return Err(NullTestError::input_shape(
            Stage::Significance,
            format!("observed statistic {observed} is not finite"),
        ));
    }
    let count = count_extreme(observed, nulls, extremity);
    let nf = n as f64;
    let p_value = if count == 0 {
        PValue::Below(1.0 / nf)
    } else if count == n {
        PValue::Above(1.0 - 1.0 / nf)
    } else {
        PValue::Exact(count as f64 / nf)
    };
    let summary = NullSummary::from_values(nulls)?;
    debug!(
        "Significance: observed {:.6}, {} of {} as extreme ({:?}), p {}",
        observed, count, n, extremity, p_value
    );
    Ok(SignificanceResult {
        observed,
        extremity,
        p_value,
        count_as_extreme: count,
        requested_size: requested,
        effective_size: n,
        excluded,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn normal_nulls(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    #[test]
    fn median_observation_is_half() {
        let nulls = normal_nulls(1000, 1);
        let median = NullSummary::from_values(&nulls).unwrap().percentile(50.0);
        let result = evaluate(median, &nulls, Extremity::TwoSided).unwrap();
        assert!((result.p_value.value() - 0.5).abs() < 0.01, "{}", result.p_value);
        assert!(!result.p_value.is_bound());
    }

    #[test]
    fn beyond_all_nulls_is_a_bound() {
        let nulls = normal_nulls(1000, 2);
        let result = evaluate(100.0, &nulls, Extremity::Upper).unwrap();
        assert_eq!(result.p_value, PValue::Below(0.001));
        assert_eq!(result.p_value.to_string(), "< 0.001");
        assert_eq!(result.count_as_extreme, 0);

        let result = evaluate(100.0, &nulls, Extremity::Lower).unwrap();
        assert_eq!(result.p_value, PValue::Above(0.999));
    }

    #[test]
    fn extremity_definitions() {
        let nulls = [-3.0, -1.0, 0.5, 2.0, 4.0];
        assert_eq!(count_extreme(0.5, &nulls, Extremity::Lower), 3);
        assert_eq!(count_extreme(0.5, &nulls, Extremity::Upper), 3);
        assert_eq!(count_extreme(-2.5, &nulls, Extremity::AbsUpper), 2);
        assert_eq!(count_extreme(-2.0, &nulls, Extremity::TwoSided), 1);
    }

    #[test]
    fn empty_nulls_rejected_before_division() {
        let err = evaluate(1.0, &[], Extremity::Upper).unwrap_err();
        assert!(matches!(err, NullTestError::EmptyEnsemble { .. }));
        assert_eq!(err.stage(), Stage::Significance);
    }

    #[test]
    fn summary_statistics() {
        let values: Vec<f64> = (1..=101).map(|i| i as f64).collect();
        let s = NullSummary::from_values(&values).unwrap();
        assert_eq!(s.mean, 51.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 101.0);
        assert_eq!(s.percentiles[2], 51.0);
        assert_eq!(s.percentile(0.0), 1.0);
        assert_eq!(s.percentile(100.0), 101.0);
        assert!((s.std - (101.0 * 102.0 / 12.0f64).sqrt()).abs() < 1e-9);
        assert!((s.fraction_below(11.0) - 10.0 / 101.0).abs() < 1e-15);
    }

    #[test]
    fn result_serializes() {
        let nulls = normal_nulls(200, 3);
        let result = evaluate(0.3, &nulls, Extremity::AbsUpper).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: SignificanceResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn single_null_value_rejected() {
        let err = evaluate(1.0, &[0.5], Extremity::Upper).unwrap_err();
        assert!(matches!(err, NullTestError::InputShape { .. }));
        assert_eq!(err.stage(), Stage::Significance);
        assert_eq!(evaluate(1.0, &[0.5, 2.0], Extremity::Upper).unwrap().p_value, PValue::Exact(0.5));
    }

    #[test]
    fn null_values_serialized_once() {
        let result = evaluate(0.0, &[3.0, -1.0, 2.0], Extremity::TwoSided).unwrap();
        assert_eq!(result.summary.values(), &[-1.0, 2.0, 3.0]);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("null_values").is_none());
        assert_eq!(json["summary"]["values"], serde_json::json!([-1.0, 2.0, 3.0]));

        // Values are re-sorted on load; an empty list is refused.
        let mut edited = json.clone();
        edited["summary"]["values"] = serde_json::json!([3.0, -1.0, 2.0]);
        let back: SignificanceResult = serde_json::from_value(edited).unwrap();
        assert_eq!(back, result);
        edited = json;
        edited["summary"]["values"] = serde_json::json!([]);
        assert!(serde_json::from_value::<SignificanceResult>(edited).is_err());
    }
}
