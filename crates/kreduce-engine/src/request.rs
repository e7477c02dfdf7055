//! Kernel requests.

use kreduce_core::{normalize, CacheKey, DType, TargetKind};
use kreduce_ffi::Layout;

use crate::error::Result;

/// What the caller wants compiled: formula, aliases, dtype and target kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelRequest {
    pub formula: Option<String>,
    pub aliases: Vec<String>,
    pub dtype: DType,
    pub target: TargetKind,
    /// Output feature dimension of a generic reduction.
    pub output_dim: usize,
}

impl KernelRequest {
    /// A generic reduction of `formula` over its aliased variables.
    pub fn reduction<S: AsRef<str>>(formula: &str, aliases: &[S], dtype: DType) -> Self {
        KernelRequest {
            formula: Some(formula.to_string()),
            aliases: aliases.iter().map(|a| a.as_ref().to_string()).collect(),
            dtype,
            target: TargetKind::GenericReduction,
            output_dim: 1,
        }
    }

    /// A precompiled target kind that needs no formula.
    pub fn builtin(target: TargetKind, dtype: DType) -> Self {
        KernelRequest {
            formula: None,
            aliases: Vec::new(),
            dtype,
            target,
            output_dim: 1,
        }
    }

    pub fn with_output_dim(mut self, output_dim: usize) -> Self {
        self.output_dim = output_dim;
        self
    }

    /// Normalize the formula and derive the cache key.
    pub fn key(&self) -> Result<CacheKey> {
        let formula = self
            .formula
            .as_deref()
            .map(|f| normalize(f, &self.aliases))
            .transpose()?;
        Ok(CacheKey::new(formula, self.dtype, self.target)?.with_output_dim(self.output_dim))
    }

    /// Argument layout of the kernel `key` resolves to. A formula key carries
    /// its own output dimension.
    pub fn layout(&self, key: &CacheKey) -> Result<Layout> {
        let output_dim = key.output_dim().unwrap_or(self.output_dim);
        Ok(Layout::for_target(key.target(), key.dtype(), key.formula(), output_dim)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use kreduce_core::{FormulaError, OrientationKernel, RadialKernel};
    use kreduce_ffi::{Convention, OutputMode, TypedArray};

    #[test]
    fn reduction_request_normalizes() {
        let request = KernelRequest::reduction("gaussian( x , y )", &["x=Vi(0,3)", "y=Vj(1,3)"], DType::Float32);
        let key = request.key().unwrap();
        let formula = key.formula().unwrap();
        assert!(formula.declaration_string().contains("auto x=Vi(0,3);"));
        assert!(formula.declaration_string().contains("auto y=Vj(1,3);"));

        let same = KernelRequest::reduction("gaussian(x,y)", &["x=Vi(0,3)", "y=Vj(1,3)"], DType::Float32);
        assert_eq!(same.key().unwrap().digest(), key.digest());

        let layout = request.layout(&key).unwrap();
        assert_eq!(layout.convention(), Convention::Reduction);
        assert_eq!(layout.output_mode(), OutputMode::Return);
    }

    #[test]
    fn output_dim_shapes_key_and_layout() {
        let narrow = KernelRequest::reduction("f(x,y)", &["x=Vi(0,3)", "y=Vj(1,3)"], DType::Float32);
        let wide = narrow.clone().with_output_dim(3);
        let (narrow_key, wide_key) = (narrow.key().unwrap(), wide.key().unwrap());
        assert_ne!(narrow_key.digest(), wide_key.digest());

        let x = TypedArray::zeros(DType::Float32, &[4, 3]).unwrap();
        let y = TypedArray::zeros(DType::Float32, &[2, 3]).unwrap();
        for (request, key, cols) in [(&narrow, &narrow_key, 1), (&wide, &wide_key, 3)] {
            let layout = request.layout(key).unwrap();
            let bound = layout.validate(&[], &[&x, &y], None).unwrap();
            assert_eq!(layout.output_shape(&bound).unwrap(), vec![4, cols]);
        }
    }

    #[test]
    fn malformed_alias_is_a_formula_error() {
        let request = KernelRequest::reduction("f(x)", &["=Vi(0,3)"], DType::Float64);
        assert!(matches!(
            request.key(),
            Err(EngineError::Formula(FormulaError::MalformedAlias { .. }))
        ));
    }

    #[test]
    fn builtin_layouts() {
        let conv = KernelRequest::builtin(
            TargetKind::SpecializedConvolution {
                kernel: RadialKernel::Cauchy,
            },
            DType::Float64,
        );
        let key = conv.key().unwrap();
        assert_eq!(conv.layout(&key).unwrap().convention(), Convention::Convolution);

        let fshape = KernelRequest::builtin(
            TargetKind::ShapeDistance {
                geometry: RadialKernel::Gaussian,
                signal: RadialKernel::Cauchy,
                orientation: OrientationKernel::Binet,
            },
            DType::Float32,
        );
        let key = fshape.key().unwrap();
        assert_eq!(fshape.layout(&key).unwrap().output_mode(), OutputMode::InPlace);
    }

    #[test]
    fn reduction_without_formula_rejected() {
        let request = KernelRequest::builtin(TargetKind::GenericReduction, DType::Float32);
        assert!(matches!(
            request.key(),
            Err(EngineError::Formula(FormulaError::MissingFormula { .. }))
        ));
    }
}
