//! Formula descriptors.
//!
//! A formula is an opaque symbolic expression plus the ordered list of
//! aliases naming its free variables. [`normalize`] validates the aliases and
//! canonicalizes whitespace so that textually equivalent requests hash and
//! compare equal. Alias order is preserved: positions are meaningful to the
//! compiled kernel.
//!
//! Two renderings of the alias list are produced and kept apart:
//! - the *declaration string* (`auto x=Vi(0,3); `), passed verbatim to the
//!   build tool and therefore valid specialization source;
//! - the *display string* (`x=Vi(0,3); y; `), for diagnostics only.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{FormulaError, Result};

/// A named free variable, optionally bound to a substitution expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableAlias {
    /// Alias name (a valid identifier).
    pub name: String,
    /// Bound expression, `None` for a bare positional name.
    pub binding: Option<String>,
}

impl VariableAlias {
    /// Parse one alias string: `name=expr` or a bare `name`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, binding) = match raw.split_once('=') {
            Some((name, expr)) => (name.trim(), Some(canonical_text(expr))),
            None => (raw.trim(), None),
        };

        let malformed = |reason: &str| FormulaError::MalformedAlias {
            alias: raw.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(malformed("alias name is empty"));
        }
        if !is_identifier(name) {
            return Err(malformed("alias name is not a valid identifier"));
        }
        if binding.as_deref() == Some("") {
            return Err(malformed("binding expression after '=' is empty"));
        }

        Ok(VariableAlias {
            name: name.to_string(),
            binding,
        })
    }

    /// Declaration clause for the build tool; bare names declare nothing.
    pub fn declaration(&self) -> Option<String> {
        self.binding
            .as_ref()
            .map(|expr| format!("auto {}={}; ", self.name, expr))
    }

    /// Parse the binding as a `Vi`/`Vj`/`Pm` variable reference.
    pub fn variable(&self) -> Option<Result<VariableBinding>> {
        self.binding.as_deref().map(VariableBinding::parse)
    }
}

impl std::fmt::Display for VariableAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.binding {
            Some(expr) => write!(f, "{}={}", self.name, expr),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A validated, whitespace-canonical formula and alias list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedFormula {
    formula: String,
    aliases: Vec<VariableAlias>,
}

impl NormalizedFormula {
    /// Canonical formula text.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Aliases in declaration order.
    pub fn aliases(&self) -> &[VariableAlias] {
        &self.aliases
    }

    /// Alias declarations as specialization source, e.g. `auto x=Vi(0,3); `.
    pub fn declaration_string(&self) -> String {
        self.aliases.iter().filter_map(VariableAlias::declaration).collect()
    }

    /// Alias list for humans, e.g. `x=Vi(0,3); y; `.
    pub fn display_string(&self) -> String {
        self.aliases.iter().map(|a| format!("{a}; ")).collect()
    }

    /// Variable references of every bound alias, in declaration order.
    ///
    /// Bare names and bindings that are not variable references (local
    /// substitutions such as `g=Exp(-x)`) are skipped.
    pub fn variables(&self) -> Vec<(&str, VariableBinding)> {
        self.aliases
            .iter()
            .filter_map(|a| match a.variable() {
                Some(Ok(v)) => Some((a.name.as_str(), v)),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for NormalizedFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula)?;
        if !self.aliases.is_empty() {
            write!(f, " with {}", self.display_string().trim_end())?;
        }
        Ok(())
    }
}

/// Validate and canonicalize a formula and its aliases.
pub fn normalize<S: AsRef<str>>(formula: &str, aliases: &[S]) -> Result<NormalizedFormula> {
    let formula = canonical_text(formula);
    if formula.is_empty() {
        return Err(FormulaError::EmptyFormula);
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(aliases.len());
    for raw in aliases {
        let alias = VariableAlias::parse(raw.as_ref())?;
        if !seen.insert(alias.name.clone()) {
            return Err(FormulaError::MalformedAlias {
                alias: raw.as_ref().to_string(),
                reason: format!("alias name '{}' is declared more than once", alias.name),
            });
        }
        parsed.push(alias);
    }

    Ok(NormalizedFormula {
        formula,
        aliases: parsed,
    })
}

/// Which index a variable is reduced or broadcast over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexCategory {
    /// Indexed by the output row `i` (`Vi`).
    I,
    /// Indexed by the reduced index `j` (`Vj`).
    J,
    /// A parameter shared by every pair (`Pm`).
    Param,
}

/// A positional variable reference: `Vi(pos,dim)`, `Vj(pos,dim)` or `Pm(pos,dim)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableBinding {
    pub category: IndexCategory,
    /// Argument slot in the kernel's input list.
    pub position: usize,
    /// Feature dimension.
    pub dim: usize,
}

impl VariableBinding {
    /// Parse a binding expression such as `Vj(1, 3)`.
    pub fn parse(expr: &str) -> Result<Self> {
        let text = canonical_text(expr);
        let malformed = || FormulaError::MalformedBinding {
            binding: expr.to_string(),
        };

        let (category, rest) = if let Some(rest) = text.strip_prefix("Vi(") {
            (IndexCategory::I, rest)
        } else if let Some(rest) = text.strip_prefix("Vj(") {
            (IndexCategory::J, rest)
        } else if let Some(rest) = text.strip_prefix("Pm(") {
            (IndexCategory::Param, rest)
        } else {
            return Err(malformed());
        };

        let args = rest.strip_suffix(')').ok_or_else(malformed)?;
        let (position, dim) = args.split_once(',').ok_or_else(malformed)?;
        let position = position.parse::<usize>().map_err(|_| malformed())?;
        let dim = dim.parse::<usize>().map_err(|_| malformed())?;
        if dim == 0 {
            return Err(malformed());
        }

        Ok(VariableBinding {
            category,
            position,
            dim,
        })
    }
}

/// Collapse whitespace runs; keep a single space only between two word
/// characters so that `f(x, y)` and `f(x,y)` normalize identically.
fn canonical_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut prev: Option<char> = None;

    for c in text.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && prev.is_some_and(is_word_char) && is_word_char(c) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
        prev = Some(c);
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
