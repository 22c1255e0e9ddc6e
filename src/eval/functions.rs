//! Emulation of the built-in IaC functions that appear in count and
//! metadata expressions.
//!
//! Calls are resolved innermost-first: a call's parameter string is
//! itself run through [`resolve_functions`] before the function is
//! applied. A call that cannot be resolved is replaced with an
//! `ERROR!_<fn>(<arg>)` sentinel, which poisons the surrounding
//! expression without aborting the pipeline.

use crate::types::AttrValue;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Function names recognized by the resolver, longest first so that
/// `coalescelist` wins over a hypothetical `coalesce`.
const FUNCTION_NAMES: &[&str] = &[
    "coalescelist",
    "setproduct",
    "regexall",
    "distinct",
    "contains",
    "element",
    "flatten",
    "replace",
    "concat",
    "length",
    "lookup",
    "keys",
    "max",
];

/// Find the next resolvable function call: returns `(name, start, args)`
/// where `start` indexes the beginning of the call and `args` is the
/// balanced parameter text between the outer parentheses.
fn find_call(expr: &str) -> Option<(&'static str, usize, String)> {
    let mut best: Option<(&'static str, usize)> = None;
    for name in FUNCTION_NAMES {
        let mut from = 0;
        while let Some(rel) = expr[from..].find(&format!("{name}(")) {
            let pos = from + rel;
            // Skip identifiers that merely end with a function name and
            // calls already poisoned with the ERROR! marker.
            let preceded_by_word = pos > 0
                && expr[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
            if preceded_by_word {
                from = pos + name.len();
                continue;
            }
            if best.is_none_or(|(_, b)| pos < b) {
                best = Some((*name, pos));
            }
            break;
        }
    }
    let (name, pos) = best?;
    let open = pos + name.len();
    let mut depth = 0usize;
    for (i, c) in expr[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let args = expr[open + 1..open + i].to_string();
                    return Some((name, pos, args));
                }
            }
            _ => {}
        }
    }
    None
}

/// Repeatedly resolve function calls in `expr` until none remain.
/// Failures splice in an `ERROR!_` sentinel and the loop moves on.
#[must_use]
pub fn resolve_functions(expr: &str) -> String {
    let mut current = expr.to_string();
    // Bounded: every round either shrinks the call count or poisons one.
    for _ in 0..64 {
        let Some((name, _, args)) = find_call(&current) else {
            return current;
        };
        let resolved_args = resolve_functions(&args);
        let call = format!("{name}({args})");
        let replacement = match apply(name, &resolved_args) {
            Some(value) => value.to_string(),
            None => {
                tracing::warn!(function = name, args = %resolved_args, "unable to evaluate function");
                format!("{}_{name}({resolved_args})", crate::types::ERROR_PREFIX)
            }
        };
        current = current.replacen(&call, &replacement, 1);
    }
    current
}

/// Split a parameter string on top-level commas, respecting brackets,
/// braces, parentheses, and quotes.
fn split_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut current = String::new();
    for c in args.chars() {
        match c {
            '"' | '\'' => {
                match in_quote {
                    Some(q) if q == c => in_quote = None,
                    None => in_quote = Some(c),
                    _ => {}
                }
                current.push(c);
            }
            '[' | '{' | '(' if in_quote.is_none() => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' if in_quote.is_none() => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 && in_quote.is_none() => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parse a literal fragment (list, map, quoted string, number, bool,
/// bare word) into an [`AttrValue`].
#[must_use]
pub fn parse_literal(text: &str) -> Option<AttrValue> {
    let t = text.trim();
    if t.is_empty() {
        return Some(AttrValue::Str(String::new()));
    }
    if let Some(inner) = t.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        let items = split_args(inner)
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| parse_literal(&p))
            .collect::<Option<Vec<_>>>()?;
        return Some(AttrValue::List(items));
    }
    if let Some(inner) = t.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        let mut map = BTreeMap::new();
        for entry in split_args(inner) {
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry
                .split_once('=')
                .or_else(|| entry.split_once(':'))?;
            map.insert(
                key.trim().trim_matches('"').trim_matches('\'').to_string(),
                parse_literal(value)?,
            );
        }
        return Some(AttrValue::Map(map));
    }
    if (t.starts_with('"') && t.ends_with('"') && t.len() >= 2)
        || (t.starts_with('\'') && t.ends_with('\'') && t.len() >= 2)
    {
        return Some(AttrValue::Str(t[1..t.len() - 1].to_string()));
    }
    if let Ok(n) = t.parse::<i64>() {
        return Some(AttrValue::Int(n));
    }
    match t {
        "True" | "true" => Some(AttrValue::Bool(true)),
        "False" | "false" => Some(AttrValue::Bool(false)),
        "None" | "null" => Some(AttrValue::Null),
        _ => Some(AttrValue::Str(t.to_string())),
    }
}

fn parse_list(text: &str) -> Option<Vec<AttrValue>> {
    match parse_literal(text)? {
        AttrValue::List(items) => Some(items),
        _ => None,
    }
}

/// Apply one function to its already-resolved parameter string. `None`
/// means the call is unresolvable.
fn apply(name: &str, args: &str) -> Option<AttrValue> {
    if args.contains(crate::types::ERROR_PREFIX) {
        return None;
    }
    match name {
        "length" => fn_length(args),
        "concat" => fn_concat(args),
        "flatten" => fn_flatten(args),
        "distinct" => fn_distinct(args),
        "element" => fn_element(args),
        "coalescelist" => fn_coalescelist(args),
        "keys" => fn_keys(args),
        "lookup" => Some(AttrValue::Null),
        "max" => fn_max(args),
        "replace" => fn_replace(args),
        "setproduct" => fn_setproduct(args),
        "contains" => fn_contains(args),
        "regexall" => fn_regexall(args),
        _ => None,
    }
}

fn fn_length(args: &str) -> Option<AttrValue> {
    let t = args.trim();
    if t.is_empty() || t == "[]" || t == "\"\"" || t == "True" || t == "False" || t == "None" {
        return Some(AttrValue::Int(0));
    }
    if let Ok(n) = t.parse::<i64>() {
        return Some(AttrValue::Int(n));
    }
    // A stringified list/map counts its elements, a plain string its chars.
    let unquoted = t.trim_matches('"');
    match parse_literal(unquoted)? {
        AttrValue::List(items) => Some(AttrValue::Int(items.len() as i64)),
        AttrValue::Map(map) => Some(AttrValue::Int(map.len() as i64)),
        AttrValue::Str(s) => Some(AttrValue::Int(s.chars().count() as i64)),
        _ => None,
    }
}

fn fn_concat(args: &str) -> Option<AttrValue> {
    let mut out = Vec::new();
    for part in split_args(args) {
        out.extend(parse_list(&part)?);
    }
    Some(AttrValue::List(out))
}

fn fn_flatten(args: &str) -> Option<AttrValue> {
    let items = parse_list(args)?;
    let mut out = Vec::new();
    for item in items {
        match item {
            AttrValue::List(inner) => out.extend(inner),
            other => out.push(other),
        }
    }
    Some(AttrValue::List(out))
}

fn fn_distinct(args: &str) -> Option<AttrValue> {
    if args.trim().is_empty() || args.trim() == "[]" {
        return Some(AttrValue::List(Vec::new()));
    }
    let items = parse_list(args)?;
    let mut out: Vec<AttrValue> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Some(AttrValue::List(out))
}

fn fn_element(args: &str) -> Option<AttrValue> {
    let t = args.trim();
    if t.is_empty() || t == "[]" || t == "\"\"" {
        return Some(AttrValue::Str(String::new()));
    }
    let parts = split_args(args);
    let items = parse_list(parts.first()?)?;
    let index = parts
        .get(1)
        .and_then(|p| p.trim().parse::<usize>().ok())
        .unwrap_or(0);
    items
        .get(index % items.len().max(1))
        .cloned()
        .or(Some(AttrValue::Str(String::new())))
}

fn fn_coalescelist(args: &str) -> Option<AttrValue> {
    let t = args.trim();
    if t.is_empty() || t == "[]" || t == "\"\"" {
        return Some(AttrValue::Str(String::new()));
    }
    let parts = split_args(args);
    for part in &parts {
        let list = parse_list(part)?;
        if !list.is_empty() {
            return Some(AttrValue::List(list));
        }
    }
    Some(AttrValue::List(Vec::new()))
}

fn fn_keys(args: &str) -> Option<AttrValue> {
    let value = parse_literal(args)?;
    let map = match value {
        AttrValue::Map(m) => m,
        AttrValue::List(items) => match items.into_iter().next()? {
            AttrValue::Map(m) => m,
            _ => return None,
        },
        _ => return None,
    };
    Some(AttrValue::List(
        map.into_keys().map(AttrValue::Str).collect(),
    ))
}

fn fn_max(args: &str) -> Option<AttrValue> {
    let cleaned = args.replace(",,", ",0,");
    let cleaned = cleaned.trim_end_matches(',');
    let values: Vec<i64> = split_args(cleaned)
        .iter()
        .flat_map(|p| match parse_literal(p) {
            Some(AttrValue::List(items)) => {
                items.iter().filter_map(AttrValue::as_int).collect::<Vec<_>>()
            }
            Some(AttrValue::Int(n)) => vec![n],
            _ => vec![],
        })
        .collect();
    values.into_iter().max().map(AttrValue::Int)
}

fn fn_replace(args: &str) -> Option<AttrValue> {
    let parts = split_args(args);
    if parts.len() < 3 {
        return None;
    }
    let subject = parts[0].trim_matches('"');
    let from = parts[1].trim_matches('"');
    let to = parts[2].trim_matches('"');
    Some(AttrValue::Str(subject.replace(from, to)))
}

fn fn_setproduct(args: &str) -> Option<AttrValue> {
    let lists: Vec<Vec<AttrValue>> = split_args(args)
        .iter()
        .map(|p| parse_list(p))
        .collect::<Option<_>>()?;
    let mut product: Vec<Vec<AttrValue>> = vec![Vec::new()];
    for list in &lists {
        let mut next = Vec::new();
        for combo in &product {
            for item in list {
                let mut extended = combo.clone();
                extended.push(item.clone());
                next.push(extended);
            }
        }
        product = next;
    }
    Some(AttrValue::List(
        product.into_iter().map(AttrValue::List).collect(),
    ))
}

fn fn_contains(args: &str) -> Option<AttrValue> {
    let parts = split_args(args);
    if parts.len() < 2 {
        return None;
    }
    let list = parse_list(&parts[0])?;
    let needle = parse_literal(&parts[1])?;
    Some(AttrValue::Bool(list.contains(&needle)))
}

fn fn_regexall(args: &str) -> Option<AttrValue> {
    let parts = split_args(args);
    if parts.len() < 2 {
        return None;
    }
    let pattern = parts[0].trim_matches('"');
    let subject = parts[1].trim_matches('"');
    let re = compile_cached(pattern)?;
    Some(AttrValue::List(
        re.find_iter(subject)
            .map(|m| AttrValue::Str(m.as_str().to_string()))
            .collect(),
    ))
}

fn compile_cached(pattern: &str) -> Option<Regex> {
    static CACHE: OnceLock<std::sync::Mutex<BTreeMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(BTreeMap::new()));
    let mut guard = cache.lock().ok()?;
    if let Some(re) = guard.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    guard.insert(pattern.to_string(), re.clone());
    Some(re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("length([\"a\", \"b\", \"c\"])", "3"; "list length")]
    #[test_case("length([])", "0"; "empty list")]
    #[test_case("length(2)", "2"; "numeric passthrough")]
    fn test_length(expr: &str, expected: &str) {
        assert_eq!(resolve_functions(expr), expected);
    }

    #[test]
    fn test_concat_joins_lists() {
        assert_eq!(
            resolve_functions("concat([\"a\"], [\"b\", \"c\"])"),
            "[\"a\", \"b\", \"c\"]"
        );
    }

    #[test]
    fn test_flatten_one_level() {
        assert_eq!(
            resolve_functions("flatten([[\"a\"], [\"b\"]])"),
            "[\"a\", \"b\"]"
        );
    }

    #[test]
    fn test_distinct_preserves_first_occurrence_order() {
        assert_eq!(
            resolve_functions("distinct([\"b\", \"a\", \"b\"])"),
            "[\"b\", \"a\"]"
        );
    }

    #[test]
    fn test_nested_calls_resolve_inner_first() {
        assert_eq!(
            resolve_functions("length(flatten([[\"a\"], [\"b\"]]))"),
            "2"
        );
    }

    #[test]
    fn test_element_defaults_to_first() {
        assert_eq!(resolve_functions("element([\"x\", \"y\"])"), "x");
    }

    #[test]
    fn test_coalescelist_picks_first_non_empty() {
        assert_eq!(
            resolve_functions("coalescelist([], [\"fallback\"])"),
            "[\"fallback\"]"
        );
    }

    #[test]
    fn test_keys_of_map() {
        assert_eq!(
            resolve_functions("keys({a = 1, b = 2})"),
            "[\"a\", \"b\"]"
        );
    }

    #[test]
    fn test_max_of_values() {
        assert_eq!(resolve_functions("max(1, 7, 3)"), "7");
    }

    #[test]
    fn test_replace_substring() {
        assert_eq!(
            resolve_functions("replace(\"web-prod\", \"prod\", \"dev\")"),
            "web-dev"
        );
    }

    #[test]
    fn test_contains_membership() {
        assert_eq!(resolve_functions("contains([\"a\", \"b\"], \"a\")"), "True");
        assert_eq!(resolve_functions("contains([\"a\"], \"z\")"), "False");
    }

    #[test]
    fn test_setproduct_pairs() {
        assert_eq!(
            resolve_functions("setproduct([\"a\"], [\"1\", \"2\"])"),
            "[[\"a\", \"1\"], [\"a\", \"2\"]]"
        );
    }

    #[test]
    fn test_regexall_collects_matches() {
        assert_eq!(
            resolve_functions("regexall(\"[a-z]+\", \"ab1cd\")"),
            "[\"ab\", \"cd\"]"
        );
    }

    #[test]
    fn test_unresolvable_call_poisons_with_sentinel() {
        let out = resolve_functions("keys(12)");
        assert!(out.starts_with("ERROR!_keys("), "got: {out}");
    }

    #[test]
    fn test_error_sentinel_is_not_reresolved() {
        let poisoned = resolve_functions("keys(12)");
        assert_eq!(resolve_functions(&poisoned), poisoned);
    }
}
