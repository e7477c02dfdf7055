//! Numeric type tags.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;

/// Element type of every buffer a compiled kernel reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float16,
    Float32,
    Float64,
}

impl DType {
    /// All supported tags.
    pub const ALL: [DType; 3] = [DType::Float16, DType::Float32, DType::Float64];

    /// Canonical tag name (`float32`).
    pub fn name(&self) -> &'static str {
        match self {
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// The native type the build tool substitutes for the element type.
    pub fn native_spelling(&self) -> &'static str {
        match self {
            DType::Float16 => "half2",
            DType::Float32 => "float",
            DType::Float64 => "double",
        }
    }

    /// Element width in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            DType::Float16 => 2,
            DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float16" | "f16" | "half" => Ok(DType::Float16),
            "float32" | "f32" | "float" => Ok(DType::Float32),
            "float64" | "f64" | "double" => Ok(DType::Float64),
            other => Err(FormulaError::UnknownDType {
                value: other.to_string(),
            }),
        }
    }
}
