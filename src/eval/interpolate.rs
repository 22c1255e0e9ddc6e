//! Symbol substitution for IaC expression strings.
//!
//! Metadata values and count expressions may reference variables
//! (`var.name`, `var.name.key`), locals (`local.name`), module outputs
//! (`module.mod.output`), and data sources (`data.type.name`). This
//! module replaces those tokens with values from the symbol tables,
//! repeating until no substitution applies.
//!
//! A missing variable with no default is fatal. A missing local warns
//! and substitutes `None`. Unknown module outputs and data sources
//! substitute the `UNKNOWN` sentinel.

use crate::error::{Result, TerracartaError};
use crate::types::{AttrValue, SymbolTables, UNKNOWN};
use regex::Regex;
use std::sync::OnceLock;

/// Replacement table for data sources whose shape is predictable enough
/// to fake. Everything else becomes `UNKNOWN`.
const DATA_REPLACEMENTS: &[(&str, &str)] = &[
    ("data.aws_availability_zones", r#"["AZ1", "AZ2", "AZ3"]"#),
    ("data.aws_region", r#""us-east-1""#),
];

/// Substitution rounds before giving up on a self-referential value.
const MAX_ROUNDS: usize = 32;

fn var_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"var\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").unwrap())
}

fn var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"var\.[A-Za-z0-9_-]+").unwrap())
}

fn local_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"local\.[A-Za-z0-9_-]+").unwrap())
}

fn module_output_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"module\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").unwrap())
}

fn data_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"data\.[A-Za-z0-9_.\[\]-]+").unwrap())
}

/// True when the string still contains a substitutable token.
#[must_use]
pub fn has_symbol_refs(value: &str) -> bool {
    value.contains("var.")
        || value.contains("local.")
        || value.contains("module.")
        || value.contains("data.")
}

/// Quote a replacement string unless it is already quoted or is a
/// list/object literal, so downstream postfix evaluation sees literals.
fn quoted(value: &AttrValue) -> String {
    match value {
        AttrValue::Str(s) => {
            let t = s.trim();
            if t.starts_with('[') || t.starts_with('{') || t.starts_with('"') {
                s.clone()
            } else {
                format!("\"{s}\"")
            }
        }
        other => other.to_string(),
    }
}

/// Symbol substituter bound to a set of symbol tables.
pub struct Interpolator<'a> {
    symbols: &'a SymbolTables,
}

impl<'a> Interpolator<'a> {
    /// Create a substituter over the given symbol tables.
    #[must_use]
    pub fn new(symbols: &'a SymbolTables) -> Self {
        Self { symbols }
    }

    /// Run the substitution loop on one value, in the scope of `module`.
    ///
    /// # Errors
    ///
    /// Returns [`TerracartaError::UnresolvedVariable`] when a `var.`
    /// reference has no value anywhere in the precedence chain.
    pub fn substitute(&self, value: &str, module: &str) -> Result<String> {
        let mut current = value.to_string();
        for _ in 0..MAX_ROUNDS {
            if !has_symbol_refs(&current) {
                return Ok(current);
            }
            let next = self.substitute_once(&current, module)?;
            if next == current {
                return Ok(current);
            }
            current = next;
        }
        tracing::warn!(value = %value, "substitution did not converge, value marked unknown");
        Ok(UNKNOWN.to_string())
    }

    fn substitute_once(&self, value: &str, module: &str) -> Result<String> {
        let mut out = value.to_string();

        // Data sources first: fixed table, else UNKNOWN.
        let data_tokens: Vec<String> = data_re()
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in data_tokens {
            let replacement = DATA_REPLACEMENTS
                .iter()
                .find(|(prefix, _)| token.starts_with(prefix))
                .map_or(UNKNOWN, |(_, value)| *value);
            out = replace_token(&out, &token, replacement);
        }

        // Module outputs.
        let module_tokens: Vec<String> = module_output_re()
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in module_tokens {
            let output_name = token.split('.').nth(2).unwrap_or_default();
            let replacement = self
                .symbols
                .outputs
                .get(output_name)
                .map_or_else(|| UNKNOWN.to_string(), |v| v.to_string());
            out = replace_token(&out, &token, &replacement);
        }

        // Object-style variable accesses before plain ones so that
        // `var.config.size` is not clobbered by the `var.config` match.
        let object_tokens: Vec<String> = var_object_re()
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in object_tokens {
            let mut parts = token.split('.');
            let _ = parts.next();
            let var_name = parts.next().unwrap_or_default();
            let key = parts.next().unwrap_or_default();
            if let Some(AttrValue::Map(map)) = self.symbols.variable(module, var_name) {
                let replacement = map
                    .get(key)
                    .map_or_else(|| UNKNOWN.to_string(), quoted);
                out = replace_token(&out, &token, &replacement);
            }
        }

        let var_tokens: Vec<String> = var_re()
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in var_tokens {
            let var_name = token.trim_start_matches("var.");
            match self.symbols.variable(module, var_name) {
                Some(value) if value.is_empty() => {
                    out = replace_token(&out, &token, "\"\"");
                }
                Some(value) => {
                    out = replace_token(&out, &token, &quoted(value));
                }
                None => {
                    return Err(TerracartaError::UnresolvedVariable {
                        variable: var_name.to_string(),
                        module: module.to_string(),
                    });
                }
            }
        }

        let local_tokens: Vec<String> = local_re()
            .find_iter(&out)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in local_tokens {
            let local_name = token.trim_start_matches("local.");
            match self.symbols.local(module, local_name) {
                Some(value) => {
                    out = replace_token(&out, &token, &quoted(value));
                }
                // A module that declares locals may still miss one name;
                // that degrades to an empty value. A local reference in a
                // module with no locals block at all is fatal.
                None if self.symbols.locals.get(module).is_some_and(|m| !m.is_empty()) => {
                    tracing::warn!(local = local_name, module = module, "cannot resolve local, assigning empty value");
                    out = replace_token(&out, &token, "None");
                }
                None => {
                    return Err(TerracartaError::UnresolvedLocal {
                        local: local_name.to_string(),
                        module: module.to_string(),
                    });
                }
            }
        }

        Ok(out)
    }
}

/// Replace a token, consuming an enclosing `${…}` wrapper when the token
/// fills it exactly.
fn replace_token(text: &str, token: &str, replacement: &str) -> String {
    let wrapped = format!("${{{token}}}");
    if text.contains(&wrapped) {
        text.replace(&wrapped, replacement)
    } else {
        text.replace(token, replacement)
    }
}
