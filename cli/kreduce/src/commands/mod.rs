//! CLI command implementations.

pub mod build;
pub mod cache;
pub mod doctor;
pub mod inspect;

use anyhow::{bail, Context, Result};
use clap::Args;
use kreduce_core::{DType, OrientationKernel, RadialKernel, TargetKind};
use kreduce_engine::KernelRequest;

/// Arguments selecting one kernel.
#[derive(Debug, Clone, Args)]
pub struct KernelArgs {
    /// Target kind (generic-reduction, specialized-convolution, shape-distance)
    #[arg(long, default_value = "generic-reduction")]
    pub kind: String,
    /// Formula of a generic reduction
    #[arg(long)]
    pub formula: Option<String>,
    /// Variable alias such as `x=Vi(0,3)`; repeat in argument order
    #[arg(long = "alias")]
    pub aliases: Vec<String>,
    /// Element type (float16, float32, float64)
    #[arg(long, default_value = "float32")]
    pub dtype: String,
    /// Radial kernel of a specialized convolution
    #[arg(long)]
    pub kernel: Option<String>,
    /// Geometry kernel of a shape distance
    #[arg(long)]
    pub geometry: Option<String>,
    /// Signal kernel of a shape distance
    #[arg(long)]
    pub signal: Option<String>,
    /// Orientation kernel of a shape distance
    #[arg(long)]
    pub orientation: Option<String>,
    /// Output dimension of a generic reduction
    #[arg(long, default_value_t = 1)]
    pub output_dim: usize,
}

impl KernelArgs {
    /// The engine request these arguments describe.
    pub fn request(&self) -> Result<KernelRequest> {
        let dtype: DType = self.dtype.parse()?;
        let target = self.target()?;
        let request = match &self.formula {
            Some(formula) if target == TargetKind::GenericReduction => {
                KernelRequest::reduction(formula, &self.aliases, dtype)
            }
            Some(_) => bail!("--formula only applies to generic reductions"),
            None => KernelRequest::builtin(target, dtype),
        };
        Ok(request.with_output_dim(self.output_dim))
    }

    fn target(&self) -> Result<TargetKind> {
        match self.kind.as_str() {
            "generic-reduction" | "reduction" => Ok(TargetKind::GenericReduction),
            "specialized-convolution" | "conv" => Ok(TargetKind::SpecializedConvolution {
                kernel: required(&self.kernel, "--kernel")?.parse::<RadialKernel>()?,
            }),
            "shape-distance" | "fshape" => Ok(TargetKind::ShapeDistance {
                geometry: required(&self.geometry, "--geometry")?.parse::<RadialKernel>()?,
                signal: required(&self.signal, "--signal")?.parse::<RadialKernel>()?,
                orientation: required(&self.orientation, "--orientation")?.parse::<OrientationKernel>()?,
            }),
            other => bail!(
                "unknown kind '{other}' (expected generic-reduction, specialized-convolution or shape-distance)"
            ),
        }
    }
}

fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("{flag} is required for this kind"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        kernel: KernelArgs,
    }

    pub(crate) fn parse(args: &[&str]) -> KernelArgs {
        let argv = std::iter::once("kreduce").chain(args.iter().copied());
        Wrapper::try_parse_from(argv).unwrap().kernel
    }

    #[test]
    fn reduction_arguments() {
        let args = parse(&[
            "--formula",
            "gaussian(x,y)",
            "--alias",
            "x=Vi(0,3)",
            "--alias",
            "y=Vj(1,3)",
        ]);
        let request = args.request().unwrap();
        assert_eq!(request.target, TargetKind::GenericReduction);
        assert_eq!(request.dtype, DType::Float32);
        assert_eq!(request.aliases, vec!["x=Vi(0,3)", "y=Vj(1,3)"]);
    }

    #[test]
    fn shape_distance_arguments() {
        let args = parse(&[
            "--kind",
            "shape-distance",
            "--geometry",
            "gaussian",
            "--signal",
            "cauchy",
            "--orientation",
            "binet",
            "--dtype",
            "float64",
        ]);
        let request = args.request().unwrap();
        assert_eq!(
            request.target,
            TargetKind::ShapeDistance {
                geometry: RadialKernel::Gaussian,
                signal: RadialKernel::Cauchy,
                orientation: OrientationKernel::Binet,
            }
        );
        assert_eq!(request.dtype, DType::Float64);
    }

    #[test]
    fn missing_kernel_choice_is_reported() {
        let err = parse(&["--kind", "conv"]).request().unwrap_err();
        assert!(err.to_string().contains("--kernel"));

        let err = parse(&["--kind", "shape-distance", "--geometry", "gaussian"])
            .request()
            .unwrap_err();
        assert!(err.to_string().contains("--signal"));
    }

    #[test]
    fn bad_values_rejected() {
        assert!(parse(&["--kind", "mystery"]).request().is_err());
        assert!(parse(&["--formula", "f(x)", "--dtype", "int8"]).request().is_err());
        assert!(parse(&["--kind", "conv", "--kernel", "gaussian", "--formula", "f(x)"])
            .request()
            .is_err());
    }
}
