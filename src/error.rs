//! Error taxonomy for the null-test engine.
//!
//! Every error names the stage that raised it and, once it has crossed a
//! pipeline boundary, the test it belongs to. Numeric inputs that triggered
//! the failure are kept in the variant so reports can show them verbatim.

use std::fmt;

/// Processing stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Geometry,
    Statistic,
    NullGeneration,
    Significance,
    Configuration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Geometry => "geometry",
            Stage::Statistic => "statistic",
            Stage::NullGeneration => "null generation",
            Stage::Significance => "significance",
            Stage::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Errors raised by the geometry, statistic, null-generation and
/// significance stages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NullTestError {
    /// Length mismatch between map/mask/catalog, a multipole set missing
    /// m entries, or a coefficient set violating the reality constraint.
    #[error("[{stage}{}] input shape: {detail}", test_suffix(.test))]
    InputShape {
        stage: Stage,
        test: Option<String>,
        detail: String,
    },

    /// The two smallest eigenvalues of a multipole tensor are closer than
    /// the configured tolerance, so the principal axis is ill-posed.
    #[error(
        "[{stage}{}] degenerate statistic at l={l}: eigenvalue gap {gap:.3e} below tolerance {tolerance:.3e}",
        test_suffix(.test)
    )]
    DegenerateStatistic {
        stage: Stage,
        test: Option<String>,
        l: u32,
        gap: f64,
        tolerance: f64,
    },

    /// No usable surrogate was produced.
    #[error(
        "[{stage}{}] empty ensemble: {requested} requested, {excluded} excluded",
        test_suffix(.test)
    )]
    EmptyEnsemble {
        stage: Stage,
        test: Option<String>,
        requested: usize,
        excluded: usize,
    },

    /// Too few valid pixels, antipodal pairs or catalog points survive the mask.
    #[error(
        "[{stage}{}] mask exhaustion: {valid} valid {what}, at least {required} required",
        test_suffix(.test)
    )]
    MaskExhaustion {
        stage: Stage,
        test: Option<String>,
        what: String,
        valid: usize,
        required: usize,
    },

    /// Inputs expressed in different coordinate frames.
    #[error("[{stage}{}] frame mismatch: {expected} vs {actual}", test_suffix(.test))]
    FrameMismatch {
        stage: Stage,
        test: Option<String>,
        expected: String,
        actual: String,
    },

    /// Run configuration outside its valid range.
    #[error("[{stage}{}] invalid configuration: {detail}", test_suffix(.test))]
    InvalidConfig {
        stage: Stage,
        test: Option<String>,
        detail: String,
    },
}

fn test_suffix(test: &Option<String>) -> String {
    match test {
        Some(name) => format!(" / {name}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, NullTestError>;

impl NullTestError {
    pub fn input_shape(stage: Stage, detail: impl Into<String>) -> Self {
        NullTestError::InputShape {
            stage,
            test: None,
            detail: detail.into(),
        }
    }

    pub fn mask_exhaustion(
        stage: Stage,
        what: impl Into<String>,
        valid: usize,
        required: usize,
    ) -> Self {
        NullTestError::MaskExhaustion {
            stage,
            test: None,
            what: what.into(),
            valid,
            required,
        }
    }

    pub fn invalid_config(detail: impl Into<String>) -> Self {
        NullTestError::InvalidConfig {
            stage: Stage::Configuration,
            test: None,
            detail: detail.into(),
        }
    }

    /// Stage that raised the error.
    pub fn stage(&self) -> Stage {
        match self {
            NullTestError::InputShape { stage, .. }
            | NullTestError::DegenerateStatistic { stage, .. }
            | NullTestError::EmptyEnsemble { stage, .. }
            | NullTestError::MaskExhaustion { stage, .. }
            | NullTestError::FrameMismatch { stage, .. }
            | NullTestError::InvalidConfig { stage, .. } => *stage,
        }
    }

    /// Name of the test the error belongs to, if it has been attached.
    pub fn test_name(&self) -> Option<&str> {
        match self {
            NullTestError::InputShape { test, .. }
            | NullTestError::DegenerateStatistic { test, .. }
            | NullTestError::EmptyEnsemble { test, .. }
            | NullTestError::MaskExhaustion { test, .. }
            | NullTestError::FrameMismatch { test, .. }
            | NullTestError::InvalidConfig { test, .. } => test.as_deref(),
        }
    }

    /// Attach the name of the failing test.
    pub fn with_test(mut self, name: &str) -> Self {
        match &mut self {
            NullTestError::InputShape { test, .. }
            | NullTestError::DegenerateStatistic { test, .. }
            | NullTestError::EmptyEnsemble { test, .. }
            | NullTestError::MaskExhaustion { test, .. }
            | NullTestError::FrameMismatch { test, .. }
            | NullTestError::InvalidConfig { test, .. } => {
                if test.is_none() {
                    *test = Some(name.to_string());
                }
            }
        }
        self
    }

    /// Whether a single surrogate failing with this error may be excluded
    /// from the ensemble (and counted) instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NullTestError::DegenerateStatistic { .. } | NullTestError::MaskExhaustion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_stage_and_test() {
        let err = NullTestError::mask_exhaustion(Stage::Statistic, "pixels", 10, 200)
            .with_test("parity_solar");
        let msg = err.to_string();
        assert!(msg.contains("statistic / parity_solar"), "{msg}");
        assert!(msg.contains("10 valid pixels"), "{msg}");
        assert_eq!(err.test_name(), Some("parity_solar"));
    }

    #[test]
    fn with_test_keeps_first_name() {
        let err = NullTestError::invalid_config("ensemble size 0")
            .with_test("inner")
            .with_test("outer");
        assert_eq!(err.test_name(), Some("inner"));
        assert_eq!(err.stage(), Stage::Configuration);
    }

    #[test]
    fn recoverable_classification() {
        let degenerate = NullTestError::DegenerateStatistic {
            stage: Stage::Statistic,
            test: None,
            l: 2,
            gap: 1e-9,
            tolerance: 1e-6,
        };
        assert!(degenerate.is_recoverable());
        assert!(!NullTestError::input_shape(Stage::Statistic, "bad").is_recoverable());
    }
}
