//! Formula and key error types.

/// Errors raised while describing a kernel request.
///
/// These are client input errors: they are reported immediately and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// An alias string could not be accepted.
    #[error("malformed alias '{alias}': {reason}")]
    MalformedAlias { alias: String, reason: String },

    /// The formula text is blank.
    #[error("formula is empty")]
    EmptyFormula,

    /// A generic reduction was requested without a formula.
    #[error("target kind '{target}' requires a formula")]
    MissingFormula { target: String },

    /// A binding expression is not of the `Vi(pos,dim)` family.
    #[error("unrecognised variable binding '{binding}'")]
    MalformedBinding { binding: String },

    /// Unknown numeric type spelling.
    #[error("unknown numeric type '{value}' (expected float16, float32 or float64)")]
    UnknownDType { value: String },

    /// Unknown kernel or target-kind name.
    #[error("unknown {category} '{value}'")]
    UnknownName { category: &'static str, value: String },
}

/// Result type alias for formula operations.
pub type Result<T> = std::result::Result<T, FormulaError>;
