//! Infix-to-postfix conversion and evaluation for count expressions.
//!
//! After full symbol substitution, `count`/`for_each` expressions are
//! plain boolean/arithmetic strings. They are normalized (two-character
//! operators shortened to one, literals hashed), converted to postfix
//! with a shunting-yard pass, and evaluated on an integer stack.
//!
//! String literals are hashed to integers so equality comparisons work
//! without runtime typing. Ternary `?:` is resolved before conversion by
//! recursively evaluating each arm and splicing the winner back in.

use std::fmt;

/// Evaluation failure. Carries the offending expression fragment; the
/// caller converts this into an `ERROR!` sentinel rather than aborting
/// the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    /// What could not be evaluated
    pub expression: String,
    /// Why
    pub reason: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot evaluate '{}': {}", self.expression, self.reason)
    }
}

impl std::error::Error for EvalError {}

fn err(expression: &str, reason: impl Into<String>) -> EvalError {
    EvalError { expression: expression.to_string(), reason: reason.into() }
}

/// Operator precedence. Everything else is an operand.
fn precedence(op: char) -> Option<u8> {
    match op {
        ':' => Some(0),
        '+' | '~' => Some(1),
        '*' | '/' => Some(2),
        '^' => Some(3),
        '&' | '|' | '!' => Some(4),
        '>' | '<' | 'G' | 'L' => Some(5),
        '=' => Some(6),
        _ => None,
    }
}

/// FNV-1a, masked to a non-negative `i64`. Stable across platforms so
/// equal strings always compare equal and runs stay reproducible.
fn hash_literal(s: &str) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash & 0x7fff_ffff_ffff_ffff) as i64
}

/// Replace every quoted string literal with its hash. Empty strings
/// hash to 0 so `"" == ""` holds and `length("")`-style results stay
/// falsy.
fn hash_strings(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' || c == '\'' {
            let quote = c;
            let mut literal = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == quote {
                    closed = true;
                    break;
                }
                literal.push(inner);
            }
            if !closed {
                // Unterminated literal: keep the raw text and let the
                // evaluator report the failure.
                out.push(quote);
                out.push_str(&literal);
                continue;
            }
            if literal.is_empty() {
                out.push('0');
            } else {
                out.push_str(&hash_literal(&literal).to_string());
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Shorten two-character operators, canonicalize booleans and unknowns,
/// and strip interpolation padding. Output contains only operands,
/// single-character operators, parentheses, and spaces.
fn normalize(expr: &str) -> String {
    let mut e = expr.trim().to_string();
    if e.starts_with("${") && e.ends_with('}') {
        e = e[2..e.len() - 1].to_string();
    }
    e = e.replace("==", "=");
    e = e.replace("!=", "!");
    e = e.replace(">=", "G");
    e = e.replace("<=", "L");
    e = e.replace("&&", "&");
    e = e.replace("||", "|");
    e = e.replace("\"True\"", "T");
    e = e.replace("\"False\"", "F");
    e = e.replace("true", "T");
    e = e.replace("false", "F");
    e = e.replace("True", "T");
    e = e.replace("False", "F");
    e = e.replace("!F", "T");
    e = e.replace("!T", "F");
    e = e.replace("!0", "1");
    e = e.replace(['[', ']'], "");
    e = e.replace(crate::types::UNKNOWN, "F");
    e = e.replace("\"None\"", "\"\"");
    e = e.replace("!None", "T");
    e = e.replace("None", "\"\"");
    hash_strings(&e)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Operand(i64),
    Op(char),
    Open,
    Close,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | ',' => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            'T' => {
                tokens.push(Token::Operand(1));
                chars.next();
            }
            'F' => {
                tokens.push(Token::Operand(0));
                chars.next();
            }
            '0'..='9' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number
                    .parse()
                    .map_err(|_| err(expr, format!("operand overflow: {number}")))?;
                tokens.push(Token::Operand(value));
            }
            _ if precedence(c).is_some() => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            _ => return Err(err(expr, format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

/// Shunting-yard conversion using the precedence table above.
fn to_postfix(tokens: &[Token], expr: &str) -> Result<Vec<Token>, EvalError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();

    for token in tokens {
        match token {
            Token::Operand(_) => output.push(*token),
            Token::Open => stack.push(*token),
            Token::Close => loop {
                match stack.pop() {
                    Some(Token::Open) => break,
                    Some(op) => output.push(op),
                    None => return Err(err(expr, "unbalanced parentheses")),
                }
            },
            Token::Op(op) => {
                let own = precedence(*op).unwrap_or(0);
                while let Some(Token::Op(top)) = stack.last() {
                    if precedence(*top).unwrap_or(0) >= own {
                        output.push(stack.pop().unwrap());
                    } else {
                        break;
                    }
                }
                stack.push(*token);
            }
        }
    }
    while let Some(top) = stack.pop() {
        if top == Token::Open {
            return Err(err(expr, "unbalanced parentheses"));
        }
        output.push(top);
    }
    Ok(output)
}

fn apply(op: char, lhs: i64, rhs: i64, expr: &str) -> Result<i64, EvalError> {
    let truth = |b: bool| i64::from(b);
    Ok(match op {
        '+' => lhs.wrapping_add(rhs),
        '~' => lhs.wrapping_sub(rhs),
        '*' => lhs.wrapping_mul(rhs),
        '/' => {
            if rhs == 0 {
                return Err(err(expr, "division by zero"));
            }
            lhs / rhs
        }
        '^' => {
            let exp = u32::try_from(rhs).map_err(|_| err(expr, "negative exponent"))?;
            lhs.checked_pow(exp).ok_or_else(|| err(expr, "exponent overflow"))?
        }
        '&' => truth(lhs != 0 && rhs != 0),
        '|' => truth(lhs != 0 || rhs != 0),
        '!' => truth(lhs != rhs),
        '=' => truth(lhs == rhs),
        '>' => truth(lhs > rhs),
        '<' => truth(lhs < rhs),
        'G' => truth(lhs >= rhs),
        'L' => truth(lhs <= rhs),
        other => return Err(err(expr, format!("unknown operator '{other}'"))),
    })
}

fn eval_postfix(postfix: &[Token], expr: &str) -> Result<i64, EvalError> {
    let mut stack: Vec<i64> = Vec::new();
    for token in postfix {
        match token {
            Token::Operand(v) => stack.push(*v),
            Token::Op(op) => {
                let rhs = stack.pop().ok_or_else(|| err(expr, "missing operand"))?;
                let lhs = stack.pop().ok_or_else(|| err(expr, "missing operand"))?;
                stack.push(apply(*op, lhs, rhs, expr)?);
            }
            Token::Open | Token::Close => {
                return Err(err(expr, "parenthesis in postfix stream"))
            }
        }
    }
    match stack.len() {
        1 => Ok(stack[0]),
        0 => Err(err(expr, "empty expression")),
        _ => Err(err(expr, "dangling operands")),
    }
}

/// Split a ternary at its top-level `?` and matching `:`, respecting
/// nested ternaries in the arms.
fn split_ternary(expr: &str) -> Option<(&str, &str, &str)> {
    let question = expr.find('?')?;
    let (cond, rest) = expr.split_at(question);
    let rest = &rest[1..];
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '?' => depth += 1,
            ':' => {
                if depth == 0 {
                    return Some((cond, &rest[..i], &rest[i + 1..]));
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Resolve ternaries innermost-last: evaluate the condition, pick the
/// winning arm, recurse into it.
fn resolve_ternary(expr: &str) -> Result<String, EvalError> {
    if !expr.contains('?') {
        return Ok(expr.to_string());
    }
    let (cond, then_arm, else_arm) =
        split_ternary(expr).ok_or_else(|| err(expr, "ternary without ':'"))?;
    let cond_value = evaluate_normalized(cond.trim())?;
    let winner = if cond_value != 0 { then_arm } else { else_arm };
    resolve_ternary(winner.trim())
}

fn evaluate_normalized(expr: &str) -> Result<i64, EvalError> {
    let resolved = resolve_ternary(expr)?;
    let tokens = tokenize(&resolved)?;
    if tokens.is_empty() {
        return Ok(0);
    }
    let postfix = to_postfix(&tokens, &resolved)?;
    eval_postfix(&postfix, &resolved)
}

/// Evaluate a fully-substituted expression string to an integer.
///
/// Booleans come back as 1/0. Strings compare by hash, so `"a" == "a"`
/// is 1 and `"a" == "b"` is 0.
pub fn evaluate(expr: &str) -> Result<i64, EvalError> {
    let normalized = normalize(expr);
    if normalized.trim().is_empty() {
        return Ok(0);
    }
    evaluate_normalized(normalized.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1 + 1", 2; "addition")]
    #[test_case("2 * 3 + 1", 7; "precedence mul before add")]
    #[test_case("2 + 3 * 2", 8; "precedence add after mul")]
    #[test_case("(2 + 3) * 2", 10; "parentheses")]
    #[test_case("10 / 2", 5; "division")]
    #[test_case("3", 3; "bare operand")]
    fn test_arithmetic(expr: &str, expected: i64) {
        assert_eq!(evaluate(expr).unwrap(), expected);
    }

    #[test_case("1 == 1", 1; "equal")]
    #[test_case("1 != 1", 0; "not equal")]
    #[test_case("2 >= 2", 1; "gte")]
    #[test_case("1 <= 0", 0; "lte")]
    #[test_case("3 > 2", 1; "gt")]
    #[test_case("true && false", 0; "and")]
    #[test_case("true || false", 1; "or")]
    fn test_boolean(expr: &str, expected: i64) {
        assert_eq!(evaluate(expr).unwrap(), expected);
    }

    #[test_case("\"production\" == \"production\"", 1; "same strings")]
    #[test_case("\"production\" == \"staging\"", 0; "different strings")]
    fn test_string_equality_by_hash(expr: &str, expected: i64) {
        assert_eq!(evaluate(expr).unwrap(), expected);
    }

    #[test_case("true ? 3 : 1", 3; "true arm")]
    #[test_case("false ? 3 : 1", 1; "false arm")]
    #[test_case("1 == 2 ? 5 : 0", 0; "comparison condition")]
    #[test_case("true ? false ? 9 : 8 : 7", 8; "nested ternary")]
    fn test_ternary(expr: &str, expected: i64) {
        assert_eq!(evaluate(expr).unwrap(), expected);
    }

    #[test]
    fn test_var_padding_is_stripped() {
        assert_eq!(evaluate("${1 + 2}").unwrap(), 3);
    }

    #[test]
    fn test_unknown_collapses_to_false() {
        assert_eq!(evaluate("UNKNOWN && true").unwrap(), 0);
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        assert!(evaluate("1 / 0").is_err());
    }

    #[test]
    fn test_empty_expression_is_zero() {
        assert_eq!(evaluate("").unwrap(), 0);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_literal("vpc"), hash_literal("vpc"));
        assert_ne!(hash_literal("vpc"), hash_literal("vpn"));
        assert!(hash_literal("anything") >= 0);
    }
}
