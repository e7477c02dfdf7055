//! Target kinds: the native entry-point families an artifact can expose.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;

/// Radial kernel applied to a squared distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadialKernel {
    Gaussian,
    Cauchy,
    Laplacian,
    InverseMultiquadric,
}

impl RadialKernel {
    pub const ALL: [RadialKernel; 4] = [
        RadialKernel::Gaussian,
        RadialKernel::Cauchy,
        RadialKernel::Laplacian,
        RadialKernel::InverseMultiquadric,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RadialKernel::Gaussian => "gaussian",
            RadialKernel::Cauchy => "cauchy",
            RadialKernel::Laplacian => "laplacian",
            RadialKernel::InverseMultiquadric => "inverse_multiquadric",
        }
    }
}

/// Kernel applied to the scalar product of two unit orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationKernel {
    Binet,
    Linear,
    GaussianOriented,
    GaussianUnoriented,
}

impl OrientationKernel {
    pub const ALL: [OrientationKernel; 4] = [
        OrientationKernel::Binet,
        OrientationKernel::Linear,
        OrientationKernel::GaussianOriented,
        OrientationKernel::GaussianUnoriented,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OrientationKernel::Binet => "binet",
            OrientationKernel::Linear => "linear",
            OrientationKernel::GaussianOriented => "gaussian_oriented",
            OrientationKernel::GaussianUnoriented => "gaussian_unoriented",
        }
    }
}

impl std::fmt::Display for RadialKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for OrientationKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RadialKernel {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        RadialKernel::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FormulaError::UnknownName {
                category: "radial kernel",
                value: s.to_string(),
            })
    }
}

impl FromStr for OrientationKernel {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        OrientationKernel::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FormulaError::UnknownName {
                category: "orientation kernel",
                value: s.to_string(),
            })
    }
}

/// The category of native entry-point signature an artifact exposes.
///
/// Kernel choices are part of the cache key: two shape-distance targets
/// with different geometry kernels are different artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// Reduction of an arbitrary formula over the `j` index.
    GenericReduction,
    /// Precompiled radial-kernel convolution.
    SpecializedConvolution { kernel: RadialKernel },
    /// Functional-shape scalar product (geometry x signal x orientation).
    ShapeDistance {
        geometry: RadialKernel,
        signal: RadialKernel,
        orientation: OrientationKernel,
    },
}

impl TargetKind {
    /// Short kind name used in diagnostics and the CLI.
    pub fn name(&self) -> &'static str {
        match self {
            TargetKind::GenericReduction => "generic-reduction",
            TargetKind::SpecializedConvolution { .. } => "specialized-convolution",
            TargetKind::ShapeDistance { .. } => "shape-distance",
        }
    }

    /// Descriptive slug used as the artifact name prefix.
    pub fn slug(&self) -> String {
        match self {
            TargetKind::GenericReduction => "reduction".to_string(),
            TargetKind::SpecializedConvolution { kernel } => format!("conv_{kernel}"),
            TargetKind::ShapeDistance {
                geometry,
                signal,
                orientation,
            } => format!("fshape_scp_{geometry}_{signal}_{orientation}"),
        }
    }

    /// Name of the symbol the compiled artifact exports.
    pub fn entry_point(&self) -> &'static str {
        match self {
            TargetKind::GenericReduction => "kreduce_reduce",
            TargetKind::SpecializedConvolution { .. } => "kreduce_conv",
            TargetKind::ShapeDistance { .. } => "cudafshape",
        }
    }

    /// Whether the kind compiles a client-supplied formula.
    pub fn requires_formula(&self) -> bool {
        matches!(self, TargetKind::GenericReduction)
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::GenericReduction => write!(f, "{}", self.name()),
            TargetKind::SpecializedConvolution { kernel } => {
                write!(f, "{}({kernel})", self.name())
            }
            TargetKind::ShapeDistance {
                geometry,
                signal,
                orientation,
            } => write!(f, "{}({geometry}, {signal}, {orientation})", self.name()),
        }
    }
}
