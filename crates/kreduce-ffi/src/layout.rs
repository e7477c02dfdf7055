//! Argument layouts: the fixed calling contract of a compiled entry point.
//!
//! A [`Layout`] lists every native parameter in calling order. Array slots
//! declare their dimensions either as fixed sizes or as named extents
//! (`nx`, `ny`, `point_dim`, ...); [`Layout::validate`] binds each extent the
//! first time it is seen and rejects any later disagreement, so the native
//! code never sees inconsistent shapes.

use std::collections::BTreeMap;
use std::fmt;

use kreduce_core::{DType, IndexCategory, NormalizedFormula, TargetKind, VariableBinding};

use crate::array::TypedArray;
use crate::error::{InvokeError, Result};

pub const NX: &str = "nx";
pub const NY: &str = "ny";
pub const POINT_DIM: &str = "point_dim";
pub const VECTOR_DIM: &str = "vector_dim";
pub const SIGNAL_DIM: &str = "signal_dim";
pub const WEIGHT_DIM: &str = "weight_dim";

/// Native calling convention of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// `i32 f(i32 nx, i32 ny, T* out, const T** args)`
    Reduction,
    /// `i32 f(T inv_sq, const T* x, const T* y, const T* beta, T* out,
    /// i32 point_dim, i32 vector_dim, i32 nx, i32 ny)`
    Convolution,
    /// `i32 f(f32, f32, f32, const T* x, const T* y, const T* f,
    /// const T* g, const T* alpha, const T* beta, T* out, i32 point_dim,
    /// i32 signal_dim, i32 weight_dim, i32 nx, i32 ny)`
    ShapeDistance,
}

/// One array dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    Symbol(&'static str),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Symbol(s) => write!(f, "{s}"),
        }
    }
}

/// Native type of a scalar slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// Always single precision, whatever the kernel dtype.
    Float32,
    /// The kernel's element type.
    Element,
}

/// One native parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Scalar { name: &'static str, ty: ScalarType },
    Input { name: String, dims: Vec<Dim> },
    Output { name: String, dims: Vec<Dim> },
    Extent { symbol: &'static str },
}

impl Param {
    fn input(name: &str, dims: &[Dim]) -> Self {
        Param::Input {
            name: name.to_string(),
            dims: dims.to_vec(),
        }
    }

    fn output(name: &str, dims: &[Dim]) -> Self {
        Param::Output {
            name: name.to_string(),
            dims: dims.to_vec(),
        }
    }
}

/// Whether the caller supplies the output or the invoker allocates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    InPlace,
    Return,
}

/// Extents bound while validating one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extents {
    values: BTreeMap<&'static str, usize>,
}

impl Extents {
    pub fn get(&self, symbol: &str) -> Option<usize> {
        self.values.get(symbol).copied()
    }

    /// The extent as the native `i32` parameter.
    pub fn native(&self, symbol: &str) -> Result<i32> {
        let value = self.get(symbol).ok_or_else(|| InvokeError::InvalidLayout {
            detail: format!("extent {symbol} is not determined by any argument"),
        })?;
        i32::try_from(value).map_err(|_| InvokeError::DimensionOverflow {
            symbol: symbol.to_string(),
            value,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }
}

/// The argument contract of a compiled entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    convention: Convention,
    dtype: DType,
    params: Vec<Param>,
    output_mode: OutputMode,
    reentrant: bool,
}

impl Layout {
    /// Layout of a shape-distance kernel: three bandwidth scalars, six
    /// point/signal/weight arrays and an in-place output of length `nx`.
    pub fn shape_distance(dtype: DType) -> Self {
        use Dim::Symbol;
        let params = vec![
            Param::Scalar { name: "geometry", ty: ScalarType::Float32 },
            Param::Scalar { name: "signal", ty: ScalarType::Float32 },
            Param::Scalar { name: "orientation", ty: ScalarType::Float32 },
            Param::input("source_points", &[Symbol(NX), Symbol(POINT_DIM)]),
            Param::input("target_points", &[Symbol(NY), Symbol(POINT_DIM)]),
            Param::input("source_signal", &[Symbol(NX), Symbol(SIGNAL_DIM)]),
            Param::input("target_signal", &[Symbol(NY), Symbol(SIGNAL_DIM)]),
            Param::input("source_weights", &[Symbol(NX), Symbol(WEIGHT_DIM)]),
            Param::input("target_weights", &[Symbol(NY), Symbol(WEIGHT_DIM)]),
            Param::output("out", &[Symbol(NX)]),
            Param::Extent { symbol: POINT_DIM },
            Param::Extent { symbol: SIGNAL_DIM },
            Param::Extent { symbol: WEIGHT_DIM },
            Param::Extent { symbol: NX },
            Param::Extent { symbol: NY },
        ];
        Self::new(Convention::ShapeDistance, dtype, params, OutputMode::InPlace)
    }

    /// Layout of a specialized convolution: `out[i] = sum_j k(x_i, y_j) beta_j`.
    pub fn specialized_convolution(dtype: DType) -> Self {
        use Dim::Symbol;
        let params = vec![
            Param::Scalar { name: "inv_sq_bandwidth", ty: ScalarType::Element },
            Param::input("x", &[Symbol(NX), Symbol(POINT_DIM)]),
            Param::input("y", &[Symbol(NY), Symbol(POINT_DIM)]),
            Param::input("beta", &[Symbol(NY), Symbol(VECTOR_DIM)]),
            Param::output("out", &[Symbol(NX), Symbol(VECTOR_DIM)]),
            Param::Extent { symbol: POINT_DIM },
            Param::Extent { symbol: VECTOR_DIM },
            Param::Extent { symbol: NX },
            Param::Extent { symbol: NY },
        ];
        Self::new(Convention::Convolution, dtype, params, OutputMode::InPlace)
    }

    /// Layout of a generic reduction, derived from the formula's variable
    /// bindings. `Vi` arrays are `[nx, dim]`, `Vj` arrays `[ny, dim]` and
    /// `Pm` parameters `[dim]`; the returned output is `[nx, output_dim]`.
    ///
    /// Argument `args[k]` is reported at native index `3 + k`.
    pub fn generic_reduction(dtype: DType, formula: &NormalizedFormula, output_dim: usize) -> Result<Self> {
        if output_dim == 0 {
            return Err(InvokeError::InvalidLayout {
                detail: "output dimension must be at least 1".to_string(),
            });
        }

        let mut slots: BTreeMap<usize, (&str, VariableBinding)> = BTreeMap::new();
        for (name, binding) in formula.variables() {
            if let Some((other, _)) = slots.insert(binding.position, (name, binding)) {
                return Err(InvokeError::InvalidLayout {
                    detail: format!(
                        "variables '{other}' and '{name}' both bind argument {}",
                        binding.position
                    ),
                });
            }
        }
        if let Some(gap) = (0..slots.len()).find(|p| !slots.contains_key(p)) {
            return Err(InvokeError::InvalidLayout {
                detail: format!("no variable binds argument {gap}"),
            });
        }

        let mut params = vec![
            Param::Extent { symbol: NX },
            Param::Extent { symbol: NY },
            Param::output("out", &[Dim::Symbol(NX), Dim::Fixed(output_dim)]),
        ];
        params.extend(slots.into_values().map(|(name, binding)| {
            let dims = match binding.category {
                IndexCategory::I => vec![Dim::Symbol(NX), Dim::Fixed(binding.dim)],
                IndexCategory::J => vec![Dim::Symbol(NY), Dim::Fixed(binding.dim)],
                IndexCategory::Param => vec![Dim::Fixed(binding.dim)],
            };
            Param::Input {
                name: name.to_string(),
                dims,
            }
        }));
        Ok(Self::new(Convention::Reduction, dtype, params, OutputMode::Return))
    }

    /// Layout for a target kind. Generic reductions need the formula.
    pub fn for_target(
        target: TargetKind,
        dtype: DType,
        formula: Option<&NormalizedFormula>,
        output_dim: usize,
    ) -> Result<Self> {
        match target {
            TargetKind::GenericReduction => {
                let formula = formula.ok_or_else(|| InvokeError::InvalidLayout {
                    detail: "a generic reduction layout needs its formula".to_string(),
                })?;
                Self::generic_reduction(dtype, formula, output_dim)
            }
            TargetKind::SpecializedConvolution { .. } => Ok(Self::specialized_convolution(dtype)),
            TargetKind::ShapeDistance { .. } => Ok(Self::shape_distance(dtype)),
        }
    }

    fn new(convention: Convention, dtype: DType, params: Vec<Param>, output_mode: OutputMode) -> Self {
        Layout {
            convention,
            dtype,
            params,
            output_mode,
            reentrant: true,
        }
    }

    /// Declare whether the entry point may run on several threads at once.
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn reentrant(&self) -> bool {
        self.reentrant
    }

    pub fn scalar_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p, Param::Scalar { .. }))
            .count()
    }

    pub fn input_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p, Param::Input { .. }))
            .count()
    }

    /// Check a call's arguments against the layout and bind every extent.
    ///
    /// `output` must be present exactly when the output mode is
    /// [`OutputMode::InPlace`].
    pub fn validate(&self, scalars: &[f64], inputs: &[&TypedArray], output: Option<&TypedArray>) -> Result<Extents> {
        check_count("scalar", self.scalar_count(), scalars.len())?;
        check_count("input", self.input_count(), inputs.len())?;
        let expected_outputs = usize::from(self.output_mode == OutputMode::InPlace);
        check_count("output", expected_outputs, usize::from(output.is_some()))?;

        let mut binder = Binder::default();
        let mut scalars = scalars.iter();
        let mut inputs = inputs.iter();

        for (index, param) in self.params.iter().enumerate() {
            match param {
                Param::Scalar { name, ty } => {
                    if let Some(&value) = scalars.next() {
                        self.check_scalar(name, *ty, value)?;
                    }
                }
                Param::Input { name, dims } => {
                    if let Some(array) = inputs.next() {
                        self.check_array(index, name, dims, array, &mut binder)?;
                    }
                }
                Param::Output { name, dims } => {
                    if let Some(array) = output {
                        self.check_array(index, name, dims, array, &mut binder)?;
                    }
                }
                Param::Extent { .. } => {}
            }
        }

        let extents = binder.finish();
        for param in &self.params {
            if let Param::Extent { symbol } = param {
                extents.native(symbol)?;
            }
        }
        Ok(extents)
    }

    /// Shape of the output slot under `extents`.
    pub fn output_shape(&self, extents: &Extents) -> Result<Vec<usize>> {
        let dims = self
            .params
            .iter()
            .find_map(|p| match p {
                Param::Output { dims, .. } => Some(dims),
                _ => None,
            })
            .ok_or_else(|| InvokeError::InvalidLayout {
                detail: "layout has no output slot".to_string(),
            })?;
        dims.iter()
            .map(|d| match d {
                Dim::Fixed(n) => Ok(*n),
                Dim::Symbol(s) => extents.get(s).ok_or_else(|| InvokeError::InvalidLayout {
                    detail: format!("output extent {s} is not determined by any input"),
                }),
            })
            .collect()
    }

    /// Render the native signature for `symbol`, e.g. for diagnostics.
    pub fn signature(&self, symbol: &str) -> String {
        let element = self.dtype.native_spelling();
        let params: Vec<String> = match self.convention {
            Convention::Reduction => vec![
                "int nx".to_string(),
                "int ny".to_string(),
                format!("{element}* out"),
                format!("const {element}** args"),
            ],
            _ => self
                .params
                .iter()
                .map(|p| match p {
                    Param::Scalar { name, ty: ScalarType::Float32 } => format!("float {name}"),
                    Param::Scalar { name, ty: ScalarType::Element } => format!("{element} {name}"),
                    Param::Input { name, .. } => format!("const {element}* {name}"),
                    Param::Output { name, .. } => format!("{element}* {name}"),
                    Param::Extent { symbol } => format!("int {symbol}"),
                })
                .collect(),
        };
        format!("int {symbol}({})", params.join(", "))
    }

    fn check_scalar(&self, name: &str, ty: ScalarType, value: f64) -> Result<()> {
        let narrowed = match (ty, self.dtype) {
            (ScalarType::Element, DType::Float64) => value,
            _ => f64::from(value as f32),
        };
        if !narrowed.is_finite() {
            return Err(InvokeError::InvalidScalar {
                name: name.to_string(),
                detail: format!("{value} is not a finite {}", native_scalar(ty, self.dtype)),
            });
        }
        Ok(())
    }

    fn check_array(
        &self,
        index: usize,
        name: &str,
        dims: &[Dim],
        array: &TypedArray,
        binder: &mut Binder,
    ) -> Result<()> {
        let mismatch = |expected: String, actual: String| InvokeError::ArgumentShapeMismatch {
            index,
            parameter: name.to_string(),
            expected,
            actual,
        };

        if array.dtype() != self.dtype {
            return Err(mismatch(
                format!("{} elements", self.dtype),
                format!("{} elements", array.dtype()),
            ));
        }
        if array.rank() != dims.len() {
            return Err(mismatch(
                format!("rank {} [{}]", dims.len(), join_dims(dims)),
                format!("rank {} {:?}", array.rank(), array.shape()),
            ));
        }
        if !array.is_contiguous() {
            return Err(mismatch(
                "contiguous row-major strides".to_string(),
                format!("strides {:?} for shape {:?}", array.strides(), array.shape()),
            ));
        }

        for (axis, (dim, &actual)) in dims.iter().zip(array.shape()).enumerate() {
            match dim {
                Dim::Fixed(n) if *n != actual => {
                    return Err(mismatch(
                        format!("axis {axis} of extent {n}"),
                        format!("extent {actual}"),
                    ));
                }
                Dim::Fixed(_) => {}
                Dim::Symbol(symbol) => binder.bind(index, name, axis, *symbol, actual)?,
            }
        }
        Ok(())
    }
}

fn check_count(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(InvokeError::ArgumentCountMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

fn native_scalar(ty: ScalarType, dtype: DType) -> &'static str {
    match (ty, dtype) {
        (ScalarType::Element, DType::Float64) => "f64",
        _ => "f32",
    }
}

fn join_dims(dims: &[Dim]) -> String {
    dims.iter().map(Dim::to_string).collect::<Vec<_>>().join(", ")
}

/// Tracks which argument first bound each extent.
#[derive(Default)]
struct Binder {
    bound: BTreeMap<&'static str, (usize, String)>,
}

impl Binder {
    fn bind(&mut self, index: usize, name: &str, axis: usize, symbol: &'static str, actual: usize) -> Result<()> {
        match self.bound.get(symbol) {
            Some((value, first)) if *value != actual => Err(InvokeError::ArgumentShapeMismatch {
                index,
                parameter: symbol.to_string(),
                expected: format!("{symbol} = {value} (from {first})"),
                actual: format!("{actual} on axis {axis} of {name}"),
            }),
            Some(_) => Ok(()),
            None => {
                self.bound.insert(symbol, (actual, name.to_string()));
                Ok(())
            }
        }
    }

    fn finish(self) -> Extents {
        Extents {
            values: self.bound.into_iter().map(|(k, (v, _))| (k, v)).collect(),
        }
    }
}
