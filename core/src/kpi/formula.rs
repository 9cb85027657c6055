//! Derived KPI formulas such as `(engaged_sessions * 100) / total_sessions`.
//!
//! Operands name other KPI results of the same group. Evaluation aligns the
//! operands on their breakdown keys; a key missing from an operand reads as 0
//! and division by zero yields 0.

use super::merge::{key_headers, key_order, number_cell, result_as_map, ResultMap};
use crate::error::{EngineError, EngineResult};
use crate::result::{Cell, QueryResult};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Operand(String),
    Number(f64),
    Op(char),
    Open,
    Close,
}

fn tokenize(formula: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = formula.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse().map_err(|_| {
                    EngineError::InvalidQuery(format!("bad number '{text}' in formula"))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Operand(chars[start..i].iter().collect()));
            }
            other => {
                return Err(EngineError::InvalidQuery(format!(
                    "unexpected '{other}' in formula"
                )))
            }
        }
    }
    Ok(tokens)
}

fn precedence(op: char) -> u8 {
    match op {
        '*' | '/' => 2,
        _ => 1,
    }
}

/// Shunting-yard conversion to postfix.
fn to_postfix(tokens: Vec<Token>) -> EngineResult<Vec<Token>> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();
    for token in tokens {
        match token {
            Token::Operand(_) | Token::Number(_) => output.push(token),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = stack.last() {
                    if precedence(*top) < precedence(op) {
                        break;
                    }
                    if let Some(t) = stack.pop() {
                        output.push(t);
                    }
                }
                stack.push(Token::Op(op));
            }
            Token::Open => stack.push(Token::Open),
            Token::Close => loop {
                match stack.pop() {
                    Some(Token::Open) => break,
                    Some(t) => output.push(t),
                    None => {
                        return Err(EngineError::InvalidQuery(
                            "unbalanced ')' in formula".into(),
                        ))
                    }
                }
            },
        }
    }
    while let Some(t) = stack.pop() {
        if t == Token::Open {
            return Err(EngineError::InvalidQuery("unbalanced '(' in formula".into()));
        }
        output.push(t);
    }
    Ok(output)
}

fn apply(op: char, a: f64, b: f64) -> f64 {
    match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' if b == 0.0 => 0.0,
        _ => a / b,
    }
}

fn evaluate(postfix: &[Token], key: &[Cell], maps: &HashMap<&str, ResultMap>) -> EngineResult<f64> {
    let mut stack = Vec::new();
    for token in postfix {
        match token {
            Token::Number(n) => stack.push(*n),
            Token::Operand(name) => {
                let value = maps.get(name.as_str()).map(|m| m.value(key)).unwrap_or(0.0);
                stack.push(value);
            }
            Token::Op(op) => {
                let (Some(b), Some(a)) = (stack.pop(), stack.pop()) else {
                    return Err(EngineError::InvalidQuery(format!("operator '{op}' lacks operands")));
                };
                stack.push(apply(*op, a, b));
            }
            Token::Open | Token::Close => {}
        }
    }
    match (stack.pop(), stack.is_empty()) {
        (Some(v), true) => Ok(v),
        _ => Err(EngineError::InvalidQuery("malformed formula".into())),
    }
}

/// Names of the results a formula reads.
pub fn operands(formula: &str) -> EngineResult<Vec<String>> {
    let mut seen = HashSet::new();
    Ok(tokenize(formula)?
        .into_iter()
        .filter_map(|t| match t {
            Token::Operand(name) if seen.insert(name.clone()) => Some(name),
            _ => None,
        })
        .collect())
}

/// Evaluate `formula` over `results` (keyed by their value header) into a
/// result whose value column is `name`.
pub fn evaluate_formula(
    name: &str,
    formula: &str,
    results: &HashMap<String, &QueryResult>,
) -> EngineResult<QueryResult> {
    let postfix = to_postfix(tokenize(formula)?)?;
    let names = operands(formula)?;
    let lookup = |operand: &str| {
        results.get(operand).copied().ok_or_else(|| {
            EngineError::InvalidQuery(format!("formula operand '{operand}' is not in the group"))
        })
    };
    let first_name = names
        .first()
        .ok_or_else(|| EngineError::InvalidQuery(format!("formula '{formula}' has no operands")))?;
    // Breakdown columns follow the first operand; others may list them in any order.
    let reference = lookup(first_name)?;

    let mut maps: HashMap<&str, ResultMap> = HashMap::new();
    for operand in &names {
        let result = lookup(operand)?;
        let order = key_order(reference, result)?;
        maps.insert(operand.as_str(), result_as_map(result, order.as_deref()));
    }

    let mut all_keys: Vec<Vec<Cell>> = Vec::new();
    let mut seen = HashSet::new();
    for operand in &names {
        if let Some(map) = maps.get(operand.as_str()) {
            for key in &map.keys {
                let id: Vec<String> = key.iter().map(Cell::key_string).collect();
                if seen.insert(id) {
                    all_keys.push(key.clone());
                }
            }
        }
    }

    let mut headers = key_headers(reference).to_vec();
    headers.push(name.to_string());
    let mut rows = Vec::with_capacity(all_keys.len());
    for key in all_keys {
        let value = evaluate(&postfix, &key, &maps)?;
        let mut row = key;
        row.push(number_cell(value));
        rows.push(row);
    }
    log::debug!("formula={name} operands={} rows={}", names.join(","), rows.len());
    Ok(QueryResult::new(headers, rows))
}
