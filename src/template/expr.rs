//! Restricted transform expressions
//!
//! `transform_for_template` is parsed as a Python expression and evaluated
//! here, in-process, over [`ExprValue`]. The only visible name is `value`.
//! Visible callables are a short list of builtins and string methods;
//! anything else is rejected as a configuration error.

use rustpython_parser::ast::{self, Constant, Expr};
use rustpython_parser::Parse;

use super::ExprValue;
use crate::core::GradeError;

/// Name bound to the typed input
pub const INPUT_NAME: &str = "value";

const BUILTINS: &[&str] = &[
    "str", "int", "float", "bool", "len", "abs", "round", "min", "max",
];

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "title",
    "capitalize",
    "strip",
    "lstrip",
    "rstrip",
    "replace",
    "swapcase",
];

/// Largest string `str * n` may build
const MAX_REPEAT_BYTES: usize = 64 * 1024;

type EvalResult = Result<ExprValue, GradeError>;

fn reject(message: impl Into<String>) -> GradeError {
    GradeError::Config(format!("transform_for_template: {}", message.into()))
}

#[derive(Debug, Clone)]
pub struct TransformExpr {
    source: String,
    expr: Expr,
}

impl TransformExpr {
    pub fn parse(source: &str) -> Result<Self, GradeError> {
        let expr = Expr::parse(source.trim(), "<transform>")
            .map_err(|e| reject(format!("invalid expression: {}", e.error)))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, value: &ExprValue) -> EvalResult {
        eval(&self.expr, value)
    }
}

fn eval(expr: &Expr, input: &ExprValue) -> EvalResult {
    match expr {
        Expr::Constant(ast::ExprConstant { value, .. }) => constant(value),
        Expr::Name(ast::ExprName { id, .. }) => {
            if id.as_str() == INPUT_NAME {
                Ok(input.clone())
            } else {
                Err(reject(format!("name '{}' is not available", id.as_str())))
            }
        }
        Expr::List(ast::ExprList { elts, .. }) => elts
            .iter()
            .map(|e| eval(e, input))
            .collect::<Result<Vec<_>, _>>()
            .map(ExprValue::List),
        Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
            let operand = eval(operand, input)?;
            match (op, operand) {
                (ast::UnaryOp::Not, v) => Ok(ExprValue::Bool(!v.truthy())),
                (ast::UnaryOp::USub, ExprValue::Int(i)) => i
                    .checked_neg()
                    .map(ExprValue::Int)
                    .ok_or_else(|| reject("integer overflow")),
                (ast::UnaryOp::USub, ExprValue::Float(f)) => Ok(ExprValue::Float(-f)),
                (ast::UnaryOp::UAdd, v @ (ExprValue::Int(_) | ExprValue::Float(_))) => Ok(v),
                (op, v) => Err(reject(format!(
                    "unsupported unary {:?} on {}",
                    op,
                    v.type_name()
                ))),
            }
        }
        Expr::BinOp(ast::ExprBinOp {
            left, op, right, ..
        }) => binary(*op, eval(left, input)?, eval(right, input)?),
        Expr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
            let mut last = ExprValue::None;
            for value in values {
                last = eval(value, input)?;
                let stop = match op {
                    ast::BoolOp::And => !last.truthy(),
                    ast::BoolOp::Or => last.truthy(),
                };
                if stop {
                    break;
                }
            }
            Ok(last)
        }
        Expr::Compare(ast::ExprCompare {
            left,
            ops,
            comparators,
            ..
        }) => {
            let mut current = eval(left, input)?;
            for (op, right) in ops.iter().zip(comparators) {
                let right = eval(right, input)?;
                if !compare(*op, &current, &right)? {
                    return Ok(ExprValue::Bool(false));
                }
                current = right;
            }
            Ok(ExprValue::Bool(true))
        }
        Expr::IfExp(ast::ExprIfExp {
            test, body, orelse, ..
        }) => {
            if eval(test, input)?.truthy() {
                eval(body, input)
            } else {
                eval(orelse, input)
            }
        }
        Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => {
            let mut out = String::new();
            for part in values {
                match part {
                    Expr::FormattedValue(ast::ExprFormattedValue {
                        value,
                        format_spec: None,
                        ..
                    }) => out.push_str(&eval(value, input)?.to_string()),
                    Expr::FormattedValue(_) => return Err(reject("format specs are not supported")),
                    other => out.push_str(&eval(other, input)?.to_string()),
                }
            }
            Ok(ExprValue::Str(out))
        }
        Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
            let target = eval(value, input)?;
            match slice.as_ref() {
                Expr::Slice(ast::ExprSlice {
                    lower, upper, step, ..
                }) => {
                    let bound = |e: &Option<Box<Expr>>| -> Result<Option<i64>, GradeError> {
                        match e {
                            None => Ok(None),
                            Some(e) => match eval(e, input)? {
                                ExprValue::Int(i) => Ok(Some(i)),
                                ExprValue::None => Ok(None),
                                other => Err(reject(format!(
                                    "slice bound must be int, got {}",
                                    other.type_name()
                                ))),
                            },
                        }
                    };
                    slice_value(&target, bound(lower)?, bound(upper)?, bound(step)?)
                }
                index => match eval(index, input)? {
                    ExprValue::Int(i) => index_value(&target, i),
                    other => Err(reject(format!(
                        "index must be int, got {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Call(ast::ExprCall {
            func,
            args,
            keywords,
            ..
        }) => {
            if !keywords.is_empty() {
                return Err(reject("keyword arguments are not supported"));
            }
            let args = args
                .iter()
                .map(|a| eval(a, input))
                .collect::<Result<Vec<_>, _>>()?;
            match func.as_ref() {
                Expr::Name(ast::ExprName { id, .. }) if BUILTINS.contains(&id.as_str()) => {
                    call_builtin(id.as_str(), args)
                }
                Expr::Attribute(ast::ExprAttribute { value, attr, .. })
                    if STR_METHODS.contains(&attr.as_str()) =>
                {
                    match eval(value, input)? {
                        ExprValue::Str(s) => call_str_method(&s, attr.as_str(), args),
                        other => Err(reject(format!(
                            "'{}' has no method '{}'",
                            other.type_name(),
                            attr.as_str()
                        ))),
                    }
                }
                _ => Err(reject("only whitelisted functions may be called")),
            }
        }
        _ => Err(reject("unsupported expression")),
    }
}

fn constant(value: &Constant) -> EvalResult {
    match value {
        Constant::None => Ok(ExprValue::None),
        Constant::Bool(b) => Ok(ExprValue::Bool(*b)),
        Constant::Str(s) => Ok(ExprValue::Str(s.clone())),
        Constant::Int(i) => i
            .to_string()
            .parse()
            .map(ExprValue::Int)
            .map_err(|_| reject("integer literal out of range")),
        Constant::Float(f) => Ok(ExprValue::Float(*f)),
        _ => Err(reject("unsupported literal")),
    }
}

fn as_f64(value: &ExprValue) -> Option<f64> {
    match value {
        ExprValue::Int(i) => Some(*i as f64),
        ExprValue::Float(f) => Some(*f),
        ExprValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_int(value: &ExprValue) -> Option<i64> {
    match value {
        ExprValue::Int(i) => Some(*i),
        ExprValue::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// `None` on division by zero or overflow (`i64::MIN // -1`)
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a.checked_rem(b)? != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

fn binary(op: ast::Operator, left: ExprValue, right: ExprValue) -> EvalResult {
    use ast::Operator::*;
    let overflow = || reject("integer overflow");
    let zero = || reject("division by zero");

    match (op, &left, &right) {
        (Add, ExprValue::Str(a), ExprValue::Str(b)) => return Ok(ExprValue::Str(format!("{}{}", a, b))),
        (Add, ExprValue::List(a), ExprValue::List(b)) => {
            return Ok(ExprValue::List(a.iter().chain(b).cloned().collect()))
        }
        (Mult, ExprValue::Str(s), n) | (Mult, n, ExprValue::Str(s)) if as_int(n).is_some() => {
            let times = usize::try_from(as_int(n).unwrap_or(0).max(0)).map_err(|_| overflow())?;
            if s.len().checked_mul(times).map_or(true, |total| total > MAX_REPEAT_BYTES) {
                return Err(reject("repeated string is too long"));
            }
            return Ok(ExprValue::Str(s.repeat(times)));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (as_int(&left), as_int(&right)) {
        return match op {
            Add => a.checked_add(b).map(ExprValue::Int).ok_or_else(overflow),
            Sub => a.checked_sub(b).map(ExprValue::Int).ok_or_else(overflow),
            Mult => a.checked_mul(b).map(ExprValue::Int).ok_or_else(overflow),
            Div if b == 0 => Err(zero()),
            Div => Ok(ExprValue::Float(a as f64 / b as f64)),
            FloorDiv if b == 0 => Err(zero()),
            FloorDiv => floor_div(a, b).map(ExprValue::Int).ok_or_else(overflow),
            Mod if b == 0 => Err(zero()),
            Mod => floor_mod(a, b).map(ExprValue::Int).ok_or_else(overflow),
            Pow if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(ExprValue::Int)
                .ok_or_else(overflow),
            Pow => Ok(ExprValue::Float((a as f64).powf(b as f64))),
            other => Err(reject(format!("unsupported operator {:?}", other))),
        };
    }

    if let (Some(a), Some(b)) = (as_f64(&left), as_f64(&right)) {
        return match op {
            Add => Ok(ExprValue::Float(a + b)),
            Sub => Ok(ExprValue::Float(a - b)),
            Mult => Ok(ExprValue::Float(a * b)),
            Div | FloorDiv | Mod if b == 0.0 => Err(zero()),
            Div => Ok(ExprValue::Float(a / b)),
            FloorDiv => Ok(ExprValue::Float((a / b).floor())),
            Mod => Ok(ExprValue::Float(a - b * (a / b).floor())),
            Pow => Ok(ExprValue::Float(a.powf(b))),
            other => Err(reject(format!("unsupported operator {:?}", other))),
        };
    }

    Err(reject(format!(
        "unsupported operand types for {:?}: {} and {}",
        op,
        left.type_name(),
        right.type_name()
    )))
}

fn compare(op: ast::CmpOp, left: &ExprValue, right: &ExprValue) -> Result<bool, GradeError> {
    use std::cmp::Ordering;
    use ast::CmpOp::*;

    if let In | NotIn = op {
        let found = match (left, right) {
            (ExprValue::Str(needle), ExprValue::Str(hay)) => hay.contains(needle.as_str()),
            (item, ExprValue::List(items)) => items.iter().any(|i| values_equal(i, item)),
            _ => return Err(reject("unsupported 'in' operands")),
        };
        return Ok(if let In = op { found } else { !found });
    }

    let ordering = match (left, right) {
        (ExprValue::Str(a), ExprValue::Str(b)) => Some(a.cmp(b)),
        _ => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };

    match op {
        Eq => Ok(values_equal(left, right)),
        NotEq => Ok(!values_equal(left, right)),
        Lt | LtE | Gt | GtE => {
            let ordering = ordering.ok_or_else(|| {
                reject(format!(
                    "cannot order {} and {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(match op {
                Lt => ordering == Ordering::Less,
                LtE => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        other => Err(reject(format!("unsupported comparison {:?}", other))),
    }
}

fn values_equal(a: &ExprValue, b: &ExprValue) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Python index with negative wrap-around
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn index_value(target: &ExprValue, index: i64) -> EvalResult {
    match target {
        ExprValue::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            resolve_index(chars.len(), index)
                .map(|i| ExprValue::Str(chars[i].to_string()))
                .ok_or_else(|| reject("string index out of range"))
        }
        ExprValue::List(items) => resolve_index(items.len(), index)
            .map(|i| items[i].clone())
            .ok_or_else(|| reject("list index out of range")),
        other => Err(reject(format!("'{}' is not subscriptable", other.type_name()))),
    }
}

/// Positions selected by `[lower:upper:step]` over a sequence of `len`
fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Vec<usize>, GradeError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(reject("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| -> i64 {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };

    let mut positions = Vec::new();
    if step > 0 {
        let start = lower.map(|b| clamp(b, 0, len)).unwrap_or(0);
        let stop = upper.map(|b| clamp(b, 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            positions.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = lower.map(|b| clamp(b, -1, len - 1)).unwrap_or(len - 1);
        let stop = upper.map(|b| clamp(b, -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            positions.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    Ok(positions)
}

fn slice_value(target: &ExprValue, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> EvalResult {
    match target {
        ExprValue::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(ExprValue::Str(picked.into_iter().map(|i| chars[i]).collect()))
        }
        ExprValue::List(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(ExprValue::List(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        other => Err(reject(format!("'{}' is not subscriptable", other.type_name()))),
    }
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

fn call_builtin(name: &str, args: Vec<ExprValue>) -> EvalResult {
    let arity = |n: usize| -> Result<(), GradeError> {
        if args.len() == n {
            Ok(())
        } else {
            Err(reject(format!("{}() takes {} argument(s)", name, n)))
        }
    };

    match name {
        "str" => {
            arity(1)?;
            Ok(ExprValue::Str(args[0].to_string()))
        }
        "bool" => {
            arity(1)?;
            Ok(ExprValue::Bool(args[0].truthy()))
        }
        "int" => {
            arity(1)?;
            match &args[0] {
                ExprValue::Int(i) => Ok(ExprValue::Int(*i)),
                ExprValue::Bool(b) => Ok(ExprValue::Int(*b as i64)),
                ExprValue::Float(f) if f.is_finite() => Ok(ExprValue::Int(f.trunc() as i64)),
                ExprValue::Str(s) => s
                    .trim()
                    .parse()
                    .map(ExprValue::Int)
                    .map_err(|_| reject(format!("invalid literal for int(): '{}'", s))),
                other => Err(reject(format!("int() of {}", other.type_name()))),
            }
        }
        "float" => {
            arity(1)?;
            match &args[0] {
                ExprValue::Str(s) => s
                    .trim()
                    .parse()
                    .map(ExprValue::Float)
                    .map_err(|_| reject(format!("could not convert string to float: '{}'", s))),
                other => as_f64(other)
                    .map(ExprValue::Float)
                    .ok_or_else(|| reject(format!("float() of {}", other.type_name()))),
            }
        }
        "len" => {
            arity(1)?;
            match &args[0] {
                ExprValue::Str(s) => Ok(ExprValue::Int(s.chars().count() as i64)),
                ExprValue::List(items) => Ok(ExprValue::Int(items.len() as i64)),
                other => Err(reject(format!("len() of {}", other.type_name()))),
            }
        }
        "abs" => {
            arity(1)?;
            match &args[0] {
                ExprValue::Int(i) => i
                    .checked_abs()
                    .map(ExprValue::Int)
                    .ok_or_else(|| reject("integer overflow")),
                ExprValue::Float(f) => Ok(ExprValue::Float(f.abs())),
                other => Err(reject(format!("abs() of {}", other.type_name()))),
            }
        }
        "round" => match args.as_slice() {
            [ExprValue::Int(i)] => Ok(ExprValue::Int(*i)),
            [ExprValue::Float(f)] => Ok(ExprValue::Int(round_half_even(*f) as i64)),
            [number, ExprValue::Int(digits)] => {
                let x = as_f64(number).ok_or_else(|| reject("round() needs a number"))?;
                let scale = 10f64.powi(*digits as i32);
                let rounded = round_half_even(x * scale) / scale;
                Ok(match number {
                    ExprValue::Int(_) => ExprValue::Int(rounded as i64),
                    _ => ExprValue::Float(rounded),
                })
            }
            _ => Err(reject("round() takes a number and optional digits")),
        },
        "min" | "max" => {
            let items = match args.as_slice() {
                [ExprValue::List(items)] => items.clone(),
                [] => return Err(reject(format!("{}() needs arguments", name))),
                _ => args,
            };
            let mut best: Option<ExprValue> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let better = if name == "min" {
                            compare(ast::CmpOp::Lt, &item, &current)?
                        } else {
                            compare(ast::CmpOp::Gt, &item, &current)?
                        };
                        if better {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.ok_or_else(|| reject(format!("{}() of empty sequence", name)))
        }
        other => Err(reject(format!("'{}' is not available", other))),
    }
}

fn str_arg(args: &[ExprValue], index: usize) -> Result<Option<&str>, GradeError> {
    match args.get(index) {
        None | Some(ExprValue::None) => Ok(None),
        Some(ExprValue::Str(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(reject(format!("expected str argument, got {}", other.type_name()))),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn call_str_method(s: &str, method: &str, args: Vec<ExprValue>) -> EvalResult {
    let result = match method {
        "upper" => s.to_uppercase(),
        "lower" => s.to_lowercase(),
        "title" => title_case(s),
        "capitalize" => {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.as_str().to_lowercase().chars())
                    .collect(),
                None => String::new(),
            }
        }
        "swapcase" => s
            .chars()
            .flat_map(|c| {
                if c.is_uppercase() {
                    c.to_lowercase().collect::<Vec<_>>()
                } else {
                    c.to_uppercase().collect::<Vec<_>>()
                }
            })
            .collect(),
        "strip" | "lstrip" | "rstrip" => {
            let chars: Option<Vec<char>> = str_arg(&args, 0)?.map(|c| c.chars().collect());
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            match method {
                "strip" => s.trim_matches(matcher).to_string(),
                "lstrip" => s.trim_start_matches(matcher).to_string(),
                _ => s.trim_end_matches(matcher).to_string(),
            }
        }
        "replace" => {
            let old = str_arg(&args, 0)?.ok_or_else(|| reject("replace() needs two arguments"))?;
            let new = str_arg(&args, 1)?.ok_or_else(|| reject("replace() needs two arguments"))?;
            s.replace(old, new)
        }
        other => return Err(reject(format!("method '{}' is not available", other))),
    };
    Ok(ExprValue::Str(result))
}
