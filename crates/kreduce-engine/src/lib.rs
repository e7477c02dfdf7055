//! Formula-driven kernel engine.
//!
//! Ties the pieces together: a [`KernelRequest`] is normalized into a cache
//! key, built at most once through the single-flight cache and compilation
//! driver, loaded through the typed invoker and kept for reuse.
//!
//! - [`config`]: engine settings and `kreduce.toml` discovery
//! - [`request`]: what to compile
//! - [`engine`]: [`KernelEngine`]
//! - [`error`]: [`EngineError`] and its retry classes

pub mod config;
pub mod engine;
pub mod error;
pub mod request;

pub use config::EngineConfig;
pub use engine::KernelEngine;
pub use error::{EngineError, Result};
pub use request::KernelRequest;

pub use kreduce_ffi::{Bandwidths, BoundKernel, ShapeDistanceInput, TypedArray};
