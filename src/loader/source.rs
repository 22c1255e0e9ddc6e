//! HCL source and variable-file parsing (Inputs C and E).
//!
//! The pipeline never reads the filesystem itself; this module walks the
//! source tree once, extracts `variable`, `locals`, `module`, and
//! `output` blocks with `hcl-rs`, and condenses them into the symbol
//! tables the expression evaluator consumes.
//!
//! Variable precedence, applied in [`build_symbols`]:
//! user tfvars > `TF_VAR_*` environment > module call arguments >
//! variable defaults.

use crate::config::ScanOptions;
use crate::error::{Result, TerracartaError};
use crate::types::{AttrValue, SymbolTables};
use hcl::{Body, Expression};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never scanned for source files.
const SKIP_DIRS: &[&str] = &[".git", ".terraform", "node_modules"];

/// Raw declarations extracted from a source tree, keyed by module scope
/// (`"main"` for the root module).
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    /// `variable` block defaults per module.
    pub variable_defaults: BTreeMap<String, BTreeMap<String, AttrValue>>,

    /// Flattened `locals` per module.
    pub locals: BTreeMap<String, BTreeMap<String, AttrValue>>,

    /// `module` call arguments (including `source`), per call label.
    pub module_calls: BTreeMap<String, BTreeMap<String, AttrValue>>,

    /// `output` value expressions by output name.
    pub outputs: BTreeMap<String, AttrValue>,

    /// Files that contributed declarations.
    pub files: Vec<PathBuf>,
}

impl ParsedSource {
    /// Fold another parse result into this one.
    pub fn merge(&mut self, other: ParsedSource) {
        for (module, vars) in other.variable_defaults {
            self.variable_defaults.entry(module).or_default().extend(vars);
        }
        for (module, locals) in other.locals {
            self.locals.entry(module).or_default().extend(locals);
        }
        for (name, args) in other.module_calls {
            self.module_calls.entry(name).or_default().extend(args);
        }
        self.outputs.extend(other.outputs);
        self.files.extend(other.files);
    }
}

/// Walk a directory tree and parse every `.tf` file found.
pub async fn parse_directory(root: &Path, options: &ScanOptions) -> Result<ParsedSource> {
    if !root.exists() {
        return Err(TerracartaError::InputNotFound { path: root.to_path_buf() });
    }
    let mut parsed = ParsedSource::default();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !should_skip(e.path()))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() || path.extension().is_none_or(|ext| ext != "tf") {
            continue;
        }
        if excluded(path, options) {
            tracing::debug!(file = %path.display(), "excluded by scan pattern");
            continue;
        }
        let module = module_scope(root, path);
        tracing::debug!(file = %path.display(), module = %module, "parsing source file");
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TerracartaError::io(path, e))?;
        match parse_content(&content, path, &module) {
            Ok(one) => parsed.merge(one),
            Err(e) if options.continue_on_error && e.is_recoverable() => {
                tracing::warn!(file = %path.display(), error = %e, "failed to parse file, continuing");
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!(
        files = parsed.files.len(),
        modules = parsed.module_calls.len(),
        outputs = parsed.outputs.len(),
        "source parsing complete"
    );
    Ok(parsed)
}

fn should_skip(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.') && name.len() > 1 || SKIP_DIRS.contains(&name))
}

/// Exclude-pattern matching against the configured glob patterns,
/// checked against both the full path and the bare file name.
fn excluded(path: &Path, options: &ScanOptions) -> bool {
    options.exclude_patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| {
                p.matches_path(path)
                    || path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|name| p.matches(name))
            })
            .unwrap_or(false)
    })
}

/// Module scope of a source file: `modules/<name>/…` trees belong to
/// `<name>`, everything else to the root module.
fn module_scope(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if component == Component::Normal("modules".as_ref()) {
            if let Some(Component::Normal(name)) = components.peek() {
                return name.to_string_lossy().into_owned();
            }
        }
    }
    "main".to_string()
}

/// Parse one file's HCL content into declarations.
pub fn parse_content(content: &str, path: &Path, module: &str) -> Result<ParsedSource> {
    let body: Body = hcl::from_str(content).map_err(|e| TerracartaError::HclParse {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut parsed = ParsedSource::default();
    parsed.files.push(path.to_path_buf());

    for structure in body.into_inner() {
        let hcl::Structure::Block(block) = structure else {
            continue;
        };
        match block.identifier.as_str() {
            "variable" => {
                let Some(name) = block.labels.first().map(|l| l.as_str().to_string()) else {
                    continue;
                };
                let default = block
                    .body
                    .attributes()
                    .find(|attr| attr.key.as_str() == "default")
                    .map(|attr| expression_to_value(&attr.expr));
                if let Some(value) = default {
                    parsed
                        .variable_defaults
                        .entry(module.to_string())
                        .or_default()
                        .insert(name, value);
                }
            }
            "locals" => {
                let locals = parsed.locals.entry(module.to_string()).or_default();
                for attr in block.body.attributes() {
                    locals.insert(
                        attr.key.as_str().to_string(),
                        expression_to_value(&attr.expr),
                    );
                }
            }
            "module" => {
                let Some(name) = block.labels.first().map(|l| l.as_str().to_string()) else {
                    continue;
                };
                let args = parsed.module_calls.entry(name).or_default();
                for attr in block.body.attributes() {
                    args.insert(
                        attr.key.as_str().to_string(),
                        expression_to_value(&attr.expr),
                    );
                }
            }
            "output" => {
                let Some(name) = block.labels.first().map(|l| l.as_str().to_string()) else {
                    continue;
                };
                if let Some(attr) = block
                    .body
                    .attributes()
                    .find(|attr| attr.key.as_str() == "value")
                {
                    parsed.outputs.insert(name, expression_to_value(&attr.expr));
                }
            }
            // resource/data/provider blocks come from the planner, which
            // has already resolved them further than the source text.
            _ => {}
        }
    }
    Ok(parsed)
}

/// Convert an HCL expression into an attribute value, preserving raw
/// expression text for anything that needs later substitution.
fn expression_to_value(expr: &Expression) -> AttrValue {
    match expr {
        Expression::Null => AttrValue::Null,
        Expression::Bool(b) => AttrValue::Bool(*b),
        Expression::Number(n) => n.as_i64().map_or_else(
            || AttrValue::Float(n.as_f64().unwrap_or_default()),
            AttrValue::Int,
        ),
        Expression::String(s) => AttrValue::Str(s.clone()),
        Expression::Array(items) => {
            AttrValue::List(items.iter().map(expression_to_value).collect())
        }
        Expression::Object(map) => AttrValue::Map(
            map.iter()
                .map(|(k, v)| (object_key(k), expression_to_value(v)))
                .collect(),
        ),
        // Templates, traversals, and function calls keep their raw HCL
        // text; the evaluator substitutes them later.
        other => AttrValue::Str(hcl::format::to_string(other).unwrap_or_default()),
    }
}

fn object_key(key: &hcl::ObjectKey) -> String {
    match key {
        hcl::ObjectKey::Identifier(id) => id.as_str().to_string(),
        hcl::ObjectKey::Expression(expr) => expression_to_value(expr).to_string(),
        _ => String::new(),
    }
}

/// Parse one `.tfvars` / `.tfvars.json` file into flat key-values.
pub async fn parse_varfile(path: &Path) -> Result<BTreeMap<String, AttrValue>> {
    if !path.exists() {
        return Err(TerracartaError::InputNotFound { path: path.to_path_buf() });
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TerracartaError::io(path, e))?;
    parse_varfile_content(&content, path)
}

/// Parse `.tfvars` content (HCL attributes or a JSON object).
pub fn parse_varfile_content(content: &str, path: &Path) -> Result<BTreeMap<String, AttrValue>> {
    if path.extension().is_some_and(|ext| ext == "json") {
        let map: BTreeMap<String, AttrValue> =
            serde_json::from_str(content).map_err(|e| TerracartaError::HclParse {
                file: path.to_path_buf(),
                message: e.to_string(),
            })?;
        return Ok(map);
    }
    let body: Body = hcl::from_str(content).map_err(|e| TerracartaError::HclParse {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(body
        .attributes()
        .map(|attr| (attr.key.as_str().to_string(), expression_to_value(&attr.expr)))
        .collect())
}

/// Condense parsed declarations into symbol tables, applying the
/// variable precedence chain. `env` is the process environment captured
/// once; only `TF_VAR_<name>` entries are considered.
pub fn build_symbols(
    parsed: &ParsedSource,
    varfiles: &[BTreeMap<String, AttrValue>],
    env: &BTreeMap<String, String>,
) -> SymbolTables {
    let mut symbols = SymbolTables::default();

    // Lowest precedence: declared defaults.
    for (module, defaults) in &parsed.variable_defaults {
        symbols
            .variables
            .entry(module.clone())
            .or_default()
            .extend(defaults.clone());
    }

    // Module call arguments become that module's variable values.
    for (module, args) in &parsed.module_calls {
        for (key, value) in args {
            match key.as_str() {
                "source" => {
                    if let Some(source) = value.as_str() {
                        symbols
                            .module_sources
                            .insert(module.clone(), source.to_string());
                    }
                }
                "version" => {}
                _ => {
                    symbols
                        .variables
                        .entry(module.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
            }
        }
    }

    // TF_VAR_* environment overrides, visible in every module scope that
    // declares the variable, and always in the root.
    for (key, value) in env {
        let Some(name) = key.strip_prefix("TF_VAR_") else {
            continue;
        };
        for vars in symbols.variables.values_mut() {
            if vars.contains_key(name) {
                vars.insert(name.to_string(), AttrValue::from(value.clone()));
            }
        }
        symbols
            .variables
            .entry("main".to_string())
            .or_default()
            .insert(name.to_string(), AttrValue::from(value.clone()));
    }

    // Highest precedence: user-supplied varfiles, normalized lowercase.
    for varfile in varfiles {
        let main = symbols.variables.entry("main".to_string()).or_default();
        for (key, value) in varfile {
            main.insert(key.to_lowercase(), value.clone());
        }
    }

    // Module arguments passed as `var.<name>` expressions resolve
    // against the root scope now that every override has landed.
    resolve_module_arg_refs(&mut symbols);

    for (module, locals) in &parsed.locals {
        symbols
            .locals
            .entry(module.clone())
            .or_default()
            .extend(locals.clone());
    }
    symbols.outputs.extend(parsed.outputs.clone());

    symbols
}

fn resolve_module_arg_refs(symbols: &mut SymbolTables) {
    use regex::Regex;
    use std::sync::OnceLock;

    static VAR_RE: OnceLock<Regex> = OnceLock::new();
    let var_re = VAR_RE.get_or_init(|| Regex::new(r"var\.[A-Za-z0-9_-]+").unwrap());

    let main_vars = symbols.variables.get("main").cloned().unwrap_or_default();
    for (module, vars) in &mut symbols.variables {
        if module == "main" {
            continue;
        }
        for value in vars.values_mut() {
            let AttrValue::Str(text) = value else {
                continue;
            };
            if !text.contains("var.") {
                continue;
            }
            let mut resolved = text.clone();
            let tokens: Vec<String> = var_re
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect();
            for token in tokens {
                let name = token.trim_start_matches("var.");
                if let Some(replacement) = main_vars.get(name) {
                    let rendered = match replacement {
                        AttrValue::Str(s) => s.clone(),
                        other => other.to_string(),
                    };
                    resolved = resolved.replace(&token, &rendered);
                }
            }
            *value = AttrValue::Str(resolved);
        }
    }
}
