//! Shape-distance convenience wrapper.
//!
//! Maps logical arguments (point clouds, signals, weights and bandwidths)
//! onto the fixed shape-distance calling convention.

use crate::array::TypedArray;
use crate::error::{InvokeError, Result};
use crate::kernel::BoundKernel;
use crate::layout::Convention;

/// Kernel bandwidths, in the units of the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bandwidths {
    pub geometry: f64,
    pub signal: f64,
    pub orientation: f64,
}

impl Bandwidths {
    /// Geometry and signal bandwidths with a unit orientation bandwidth.
    pub fn new(geometry: f64, signal: f64) -> Self {
        Bandwidths {
            geometry,
            signal,
            orientation: 1.0,
        }
    }

    pub fn with_orientation(mut self, orientation: f64) -> Self {
        self.orientation = orientation;
        self
    }

    /// `1/sigma^2` for geometry, signal and orientation, in that order.
    pub fn inverse_squared(&self) -> Result<[f64; 3]> {
        let invert = |name: &str, sigma: f64| {
            if !sigma.is_finite() || sigma <= 0.0 {
                return Err(InvokeError::InvalidScalar {
                    name: format!("{name} bandwidth"),
                    detail: format!("{sigma} is not a positive finite number"),
                });
            }
            Ok(1.0 / (sigma * sigma))
        };
        Ok([
            invert("geometry", self.geometry)?,
            invert("signal", self.signal)?,
            invert("orientation", self.orientation)?,
        ])
    }
}

/// Source and target shapes: rows are points, columns features.
///
/// Sources have `nx` rows and targets `ny`; points share `point_dim`
/// columns, signals `signal_dim`, weights `weight_dim`.
#[derive(Debug, Clone, Copy)]
pub struct ShapeDistanceInput<'a> {
    pub source_points: &'a TypedArray,
    pub target_points: &'a TypedArray,
    pub source_signal: &'a TypedArray,
    pub target_signal: &'a TypedArray,
    pub source_weights: &'a TypedArray,
    pub target_weights: &'a TypedArray,
}

impl<'a> ShapeDistanceInput<'a> {
    /// Arrays in native argument order.
    pub fn arrays(&self) -> [&'a TypedArray; 6] {
        [
            self.source_points,
            self.target_points,
            self.source_signal,
            self.target_signal,
            self.source_weights,
            self.target_weights,
        ]
    }
}

/// Evaluate a shape-distance kernel into `output` (length `nx`).
pub fn shape_distance(
    kernel: &BoundKernel,
    input: &ShapeDistanceInput<'_>,
    bandwidths: &Bandwidths,
    output: &mut TypedArray,
) -> Result<()> {
    if kernel.layout().convention() != Convention::ShapeDistance {
        return Err(InvokeError::InvalidLayout {
            detail: format!("{} is not a shape-distance kernel", kernel.symbol()),
        });
    }
    let scalars = bandwidths.inverse_squared()?;
    kernel.invoke(&scalars, &input.arrays(), Some(output))?;
    Ok(())
}
