//! Bound kernels: a typed entry point plus its layout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kreduce_core::DType;
use libloading::Library;
use parking_lot::Mutex;
use tracing::trace;

use crate::array::{Element, TypedArray};
use crate::error::{InvokeError, Result};
use crate::layout::{Convention, Extents, Layout, OutputMode, NX, NY, POINT_DIM, SIGNAL_DIM, VECTOR_DIM, WEIGHT_DIM};

/// `i32 f(i32 nx, i32 ny, T* out, const T** args)`
pub type ReductionFn<T> = unsafe extern "C" fn(i32, i32, *mut T, *const *const T) -> i32;

/// `i32 f(T inv_sq, const T* x, const T* y, const T* beta, T* out,
/// i32 point_dim, i32 vector_dim, i32 nx, i32 ny)`
pub type ConvolutionFn<T> =
    unsafe extern "C" fn(T, *const T, *const T, *const T, *mut T, i32, i32, i32, i32) -> i32;

/// `i32 f(f32, f32, f32, const T* x, const T* y, const T* f, const T* g,
/// const T* alpha, const T* beta, T* out, i32 point_dim, i32 signal_dim,
/// i32 weight_dim, i32 nx, i32 ny)`
pub type ShapeDistanceFn<T> = unsafe extern "C" fn(
    f32,
    f32,
    f32,
    *const T,
    *const T,
    *const T,
    *const T,
    *const T,
    *const T,
    *mut T,
    i32,
    i32,
    i32,
    i32,
    i32,
) -> i32;

/// An entry point typed for one element type.
#[derive(Clone, Copy)]
pub enum Entry<T> {
    Reduction(ReductionFn<T>),
    Convolution(ConvolutionFn<T>),
    ShapeDistance(ShapeDistanceFn<T>),
}

impl<T> std::fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entry::{:?}", self.convention())
    }
}

impl<T> Entry<T> {
    fn convention(&self) -> Convention {
        match self {
            Entry::Reduction(_) => Convention::Reduction,
            Entry::Convolution(_) => Convention::Convolution,
            Entry::ShapeDistance(_) => Convention::ShapeDistance,
        }
    }
}

/// A resolved entry point.
#[derive(Debug, Clone, Copy)]
pub enum EntryPoint {
    F32(Entry<f32>),
    F64(Entry<f64>),
    /// Present in the library, but its element type has no host buffers.
    Unsupported,
}

impl EntryPoint {
    /// Look up `symbol` in `library`, typed by `convention` and `dtype`.
    ///
    /// # Safety
    ///
    /// The symbol must be a function with exactly the native signature of
    /// `convention` over elements of `dtype`.
    pub unsafe fn resolve(
        library: &Library,
        symbol: &str,
        convention: Convention,
        dtype: DType,
    ) -> std::result::Result<Self, libloading::Error> {
        Ok(match dtype {
            DType::Float32 => EntryPoint::F32(resolve_typed(library, symbol, convention)?),
            DType::Float64 => EntryPoint::F64(resolve_typed(library, symbol, convention)?),
            DType::Float16 => {
                library.get::<unsafe extern "C" fn()>(symbol.as_bytes())?;
                EntryPoint::Unsupported
            }
        })
    }

    fn matches(&self, layout: &Layout) -> bool {
        match self {
            EntryPoint::F32(e) => layout.dtype() == DType::Float32 && e.convention() == layout.convention(),
            EntryPoint::F64(e) => layout.dtype() == DType::Float64 && e.convention() == layout.convention(),
            EntryPoint::Unsupported => layout.dtype() == DType::Float16,
        }
    }
}

unsafe fn resolve_typed<T: Element>(
    library: &Library,
    symbol: &str,
    convention: Convention,
) -> std::result::Result<Entry<T>, libloading::Error> {
    let name = symbol.as_bytes();
    Ok(match convention {
        Convention::Reduction => Entry::Reduction(*library.get::<ReductionFn<T>>(name)?),
        Convention::Convolution => Entry::Convolution(*library.get::<ConvolutionFn<T>>(name)?),
        Convention::ShapeDistance => Entry::ShapeDistance(*library.get::<ShapeDistanceFn<T>>(name)?),
    })
}

/// A loaded entry point with its fixed argument contract.
///
/// Calls are validated against the [`Layout`] before crossing into native
/// code. Kernels whose layout is not reentrant are serialized internally.
pub struct BoundKernel {
    symbol: String,
    path: Option<PathBuf>,
    entry: EntryPoint,
    layout: Layout,
    call_lock: Mutex<()>,
    _library: Option<Arc<Library>>,
}

impl std::fmt::Debug for BoundKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundKernel")
            .field("symbol", &self.symbol)
            .field("path", &self.path)
            .field("layout", &self.layout)
            .finish()
    }
}

impl BoundKernel {
    pub(crate) fn from_library(
        library: Arc<Library>,
        path: &Path,
        symbol: &str,
        entry: EntryPoint,
        layout: Layout,
    ) -> Self {
        BoundKernel {
            symbol: symbol.to_string(),
            path: Some(path.to_path_buf()),
            entry,
            layout,
            call_lock: Mutex::new(()),
            _library: Some(library),
        }
    }

    /// Bind an entry point that is already part of the process.
    ///
    /// # Safety
    ///
    /// `entry` must honour the native calling convention of `layout` and stay
    /// valid for the lifetime of the returned kernel.
    pub unsafe fn from_entry(symbol: &str, entry: EntryPoint, layout: Layout) -> Result<Self> {
        if !entry.matches(&layout) {
            return Err(InvokeError::InvalidLayout {
                detail: format!(
                    "entry point {symbol} does not match a {:?} layout over {}",
                    layout.convention(),
                    layout.dtype()
                ),
            });
        }
        Ok(BoundKernel {
            symbol: symbol.to_string(),
            path: None,
            entry,
            layout,
            call_lock: Mutex::new(()),
            _library: None,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Library the entry point was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Validate the arguments and call the entry point.
    ///
    /// With an in-place layout `output` is overwritten and `None` is
    /// returned; otherwise a zeroed output is allocated, filled and returned.
    pub fn invoke(
        &self,
        scalars: &[f64],
        inputs: &[&TypedArray],
        output: Option<&mut TypedArray>,
    ) -> Result<Option<TypedArray>> {
        let extents = self.layout.validate(scalars, inputs, output.as_deref())?;

        let mut allocated = match self.layout.output_mode() {
            OutputMode::Return => {
                let shape = self.layout.output_shape(&extents)?;
                Some(TypedArray::zeros(self.layout.dtype(), &shape)?)
            }
            OutputMode::InPlace => None,
        };
        let target = match (output, allocated.as_mut()) {
            (Some(out), _) | (None, Some(out)) => out,
            (None, None) => {
                return Err(InvokeError::InvalidLayout {
                    detail: "no output buffer".to_string(),
                })
            }
        };

        trace!(symbol = %self.symbol, extents = ?extents, "invoking kernel");
        let status = {
            let _serial = (!self.layout.reentrant())
                .then(|| self.call_lock.lock());
            match self.entry {
                EntryPoint::F32(entry) => call(entry, scalars, inputs, target, &extents)?,
                EntryPoint::F64(entry) => call(entry, scalars, inputs, target, &extents)?,
                EntryPoint::Unsupported => {
                    return Err(InvokeError::UnsupportedDType {
                        dtype: self.layout.dtype(),
                    })
                }
            }
        };

        if status != 0 {
            return Err(InvokeError::KernelFailed {
                symbol: self.symbol.clone(),
                status,
            });
        }
        Ok(allocated)
    }
}

fn call<T: Element>(
    entry: Entry<T>,
    scalars: &[f64],
    inputs: &[&TypedArray],
    output: &mut TypedArray,
    extents: &Extents,
) -> Result<i32> {
    let unsupported = || InvokeError::UnsupportedDType { dtype: T::DTYPE };
    let args: Vec<*const T> = inputs
        .iter()
        .map(|a| a.as_slice::<T>().map(<[T]>::as_ptr))
        .collect::<Option<_>>()
        .ok_or_else(unsupported)?;
    let out = output.as_mut_slice::<T>().ok_or_else(unsupported)?.as_mut_ptr();
    let nx = extents.native(NX)?;
    let ny = extents.native(NY)?;

    // Safety: the layout validated argument counts, element types, ranks,
    // contiguity and every extent passed alongside the buffers.
    let status = match entry {
        Entry::Reduction(f) => unsafe { f(nx, ny, out, args.as_ptr()) },
        Entry::Convolution(f) => {
            let point_dim = extents.native(POINT_DIM)?;
            let vector_dim = extents.native(VECTOR_DIM)?;
            let inv_sq = T::from_f64(scalars[0]);
            unsafe { f(inv_sq, args[0], args[1], args[2], out, point_dim, vector_dim, nx, ny) }
        }
        Entry::ShapeDistance(f) => {
            let point_dim = extents.native(POINT_DIM)?;
            let signal_dim = extents.native(SIGNAL_DIM)?;
            let weight_dim = extents.native(WEIGHT_DIM)?;
            unsafe {
                f(
                    scalars[0] as f32,
                    scalars[1] as f32,
                    scalars[2] as f32,
                    args[0],
                    args[1],
                    args[2],
                    args[3],
                    args[4],
                    args[5],
                    out,
                    point_dim,
                    signal_dim,
                    weight_dim,
                    nx,
                    ny,
                )
            }
        }
    };
    Ok(status)
}
