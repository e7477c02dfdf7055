//! Typed invocation of compiled kreduce kernels.
//!
//! - [`array`]: host-side typed arrays
//! - [`layout`]: argument contracts and pre-call validation
//! - [`kernel`]: typed entry points and [`BoundKernel::invoke`]
//! - [`loader`]: dynamic loading of artifacts
//! - [`shape_distance`]: shape-distance convenience wrapper
//!
//! Every argument is checked by [`BoundKernel`] before the native call.

pub mod array;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod loader;
pub mod shape_distance;

pub use array::{ArrayData, Element, TypedArray};
pub use error::{InvokeError, Result};
pub use kernel::{BoundKernel, Entry, EntryPoint};
pub use layout::{Convention, Dim, Extents, Layout, OutputMode, Param, ScalarType};
pub use loader::load;
pub use shape_distance::{shape_distance, Bandwidths, ShapeDistanceInput};
