//! Core descriptors for the kreduce kernel-reduction engine.
//!
//! Everything here is pure data: formulas and their aliases, numeric type
//! tags, target kinds, and the cache key that identifies one compiled
//! specialization.
//!
//! ## Modules
//!
//! - [`formula`]: alias parsing and formula normalization
//! - [`dtype`]: numeric type tags
//! - [`target`]: entry-point families and kernel choices
//! - [`key`]: cache keys, digests and artifact names
//! - [`hash`]: SHA-256 content hashing

pub mod dtype;
pub mod error;
pub mod formula;
pub mod hash;
pub mod key;
pub mod target;

pub use dtype::DType;
pub use error::{FormulaError, Result};
pub use formula::{normalize, IndexCategory, NormalizedFormula, VariableAlias, VariableBinding};
pub use hash::ContentHash;
pub use key::CacheKey;
pub use target::{OrientationKernel, RadialKernel, TargetKind};
