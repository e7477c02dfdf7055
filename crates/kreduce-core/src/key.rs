//! Cache keys and derived artifact names.

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{FormulaError, Result};
use crate::formula::NormalizedFormula;
use crate::hash::ContentHash;
use crate::target::TargetKind;

/// Number of digest characters embedded in artifact names (128 bits).
const NAME_DIGEST_LEN: usize = 32;

/// Identifies one compiled specialization.
///
/// Identical keys must always resolve to functionally identical artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    formula: Option<NormalizedFormula>,
    dtype: DType,
    target: TargetKind,
    /// Output columns of a formula target. The artifact's output buffer is
    /// sized from it, so it is part of the digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_dim: Option<usize>,
}

impl CacheKey {
    /// Build a key, checking that the target kind receives a formula iff it
    /// compiles one.
    pub fn new(formula: Option<NormalizedFormula>, dtype: DType, target: TargetKind) -> Result<Self> {
        if target.requires_formula() && formula.is_none() {
            return Err(FormulaError::MissingFormula {
                target: target.name().to_string(),
            });
        }
        let formula = if target.requires_formula() { formula } else { None };
        Ok(CacheKey {
            output_dim: formula.as_ref().map(|_| 1),
            formula,
            dtype,
            target,
        })
    }

    /// Key for a generic reduction of `formula`.
    pub fn reduction(formula: NormalizedFormula, dtype: DType) -> Self {
        CacheKey {
            formula: Some(formula),
            dtype,
            target: TargetKind::GenericReduction,
            output_dim: Some(1),
        }
    }

    /// Set the output dimension of a formula target. Targets without a
    /// formula have a fixed output shape and are left unchanged.
    pub fn with_output_dim(mut self, output_dim: usize) -> Self {
        if self.output_dim.is_some() {
            self.output_dim = Some(output_dim);
        }
        self
    }

    /// Key for a precompiled target that takes no formula.
    pub fn builtin(target: TargetKind, dtype: DType) -> Result<Self> {
        Self::new(None, dtype, target)
    }

    pub fn formula(&self) -> Option<&NormalizedFormula> {
        self.formula.as_ref()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    pub fn output_dim(&self) -> Option<usize> {
        self.output_dim
    }

    /// SHA-256 over the canonical serialization of the whole key.
    pub fn digest(&self) -> ContentHash {
        ContentHash::of_value(self)
    }

    /// Deterministic artifact name: `<kind slug>_<dtype>_<digest prefix>`.
    ///
    /// Every process derives the same name for the same key.
    pub fn artifact_name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.target.slug(),
            self.dtype.name(),
            self.digest().prefix(NAME_DIGEST_LEN)
        )
    }

    /// One-line description for errors and logs: kind, dtype, digest prefix.
    pub fn describe(&self) -> String {
        format!(
            "{} [{}, key {}]",
            self.target,
            self.dtype,
            self.digest().prefix(12)
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
