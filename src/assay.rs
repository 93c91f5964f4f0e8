//! Default assay selection and size-factor normalization.

use serde::Serialize;

use crate::error::KiraError;
use crate::experiment::Matrix;
use crate::store::StoreBackend;

pub const COLUMN_SUM: &str = "column_sum";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssayChoice {
    pub assay: String,
    pub normalize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssayPredicate {
    PrefixIgnoreCase(String),
    Exact(String),
}

impl AssayPredicate {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            AssayPredicate::PrefixIgnoreCase(prefix) => name
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
            AssayPredicate::Exact(expected) => name == expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssayRule {
    pub predicate: AssayPredicate,
    pub normalize: bool,
}

impl AssayRule {
    pub fn prefix(prefix: &str, normalize: bool) -> Self {
        Self {
            predicate: AssayPredicate::PrefixIgnoreCase(prefix.to_string()),
            normalize,
        }
    }
}

/// Ordered rules; the first rule with any matching assay decides. Without a
/// match the first assay is used and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssaySelector {
    rules: Vec<AssayRule>,
}

impl Default for AssaySelector {
    fn default() -> Self {
        Self {
            rules: vec![AssayRule::prefix("log", false), AssayRule::prefix("count", true)],
        }
    }
}

impl AssaySelector {
    pub fn new(rules: Vec<AssayRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: AssayRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[AssayRule] {
        &self.rules
    }

    pub fn choose<S: AsRef<str>>(&self, names: &[S]) -> Result<AssayChoice, KiraError> {
        let first = names.first().ok_or(KiraError::NoAssay)?;
        for rule in &self.rules {
            if let Some(name) = names
                .iter()
                .map(|name| name.as_ref())
                .find(|name| rule.predicate.matches(name))
            {
                return Ok(AssayChoice {
                    assay: name.to_string(),
                    normalize: rule.normalize,
                });
            }
        }
        Ok(AssayChoice {
            assay: first.as_ref().to_string(),
            normalize: true,
        })
    }

    /// Whether a caller-named assay still needs normalization: the first rule
    /// matching `name` decides, otherwise it is treated as raw.
    pub fn normalize_for(&self, name: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(name))
            .map(|rule| rule.normalize)
            .unwrap_or(true)
    }
}

pub fn choose_assay<S: AsRef<str>>(names: &[S]) -> Result<AssayChoice, KiraError> {
    AssaySelector::default().choose(names)
}

/// Column sums divided by their mean. An all-zero or empty input yields
/// non-finite factors; see [`has_usable_size_factors`].
pub fn size_factors_from_sums(sums: &[f64]) -> Vec<f64> {
    let mean = sums.iter().sum::<f64>() / sums.len() as f64;
    sums.iter().map(|sum| sum / mean).collect()
}

pub fn has_usable_size_factors(factors: &[f64]) -> bool {
    !factors.is_empty() && factors.iter().all(|factor| factor.is_finite())
}

pub fn compute_size_factors<B: StoreBackend>(assay: &Matrix<'_, B>) -> Result<Vec<f64>, KiraError> {
    Ok(size_factors_from_sums(&assay.statistic(COLUMN_SUM)?))
}

/// `values[i] / factors[i]` (zero where the factor is not positive), then
/// optionally `log2`.
pub fn normalize(values: &[f64], factors: &[f64], log: bool) -> Result<Vec<f64>, KiraError> {
    if values.len() != factors.len() {
        return Err(KiraError::LengthMismatch {
            left: values.len(),
            right: factors.len(),
        });
    }
    Ok(values
        .iter()
        .zip(factors)
        .map(|(value, factor)| {
            let scaled = if *factor > 0.0 && factor.is_finite() {
                value / factor
            } else {
                0.0
            };
            if log { scaled.log2() } else { scaled }
        })
        .collect())
}
