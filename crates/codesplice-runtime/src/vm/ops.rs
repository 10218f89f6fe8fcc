//! Operator and builtin semantics
//!
//! Integer arithmetic is checked: overflow is an error, never a wrap.
//! Division and modulo round toward negative infinity.

use crate::bytecode::{CompareOp, Opcode};
use crate::value::{Builtin, RuntimeError, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Float(x) => Some(Num::Float(x.0)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(x) => x,
        }
    }
}

fn unsupported(symbol: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        symbol,
        a.type_name(),
        b.type_name()
    ))
}

fn binary_symbol(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::BinaryPower => "**",
        Opcode::BinaryMultiply => "*",
        Opcode::BinaryModulo => "%",
        Opcode::BinaryAdd => "+",
        Opcode::BinarySubtract => "-",
        Opcode::BinaryFloorDivide => "//",
        _ => "/",
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Vec<T> {
    let times = usize::try_from(times).unwrap_or(0);
    items.iter().cloned().cycle().take(items.len() * times).collect()
}

/// Apply a `BINARY_*` opcode to `a` and `b`
pub fn binary(opcode: Opcode, a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (opcode, &a, &b) {
        (Opcode::BinaryAdd, Value::Str(x), Value::Str(y)) => return Ok(Value::Str(format!("{}{}", x, y))),
        (Opcode::BinaryAdd, Value::Tuple(x), Value::Tuple(y)) => {
            return Ok(Value::Tuple(x.iter().chain(y).cloned().collect()))
        }
        (Opcode::BinaryMultiply, Value::Str(s), Value::Int(n))
        | (Opcode::BinaryMultiply, Value::Int(n), Value::Str(s)) => {
            return Ok(Value::Str(s.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (Opcode::BinaryMultiply, Value::Tuple(items), Value::Int(n))
        | (Opcode::BinaryMultiply, Value::Int(n), Value::Tuple(items)) => {
            return Ok(Value::Tuple(repeat(items, *n)))
        }
        _ => {}
    }

    let (Some(x), Some(y)) = (Num::of(&a), Num::of(&b)) else {
        return Err(unsupported(binary_symbol(opcode), &a, &b));
    };
    match (x, y) {
        (Num::Int(x), Num::Int(y)) => int_binary(opcode, x, y),
        _ => float_binary(opcode, x.as_f64(), y.as_f64()).map(Value::float),
    }
}

fn int_binary(opcode: Opcode, a: i64, b: i64) -> Result<Value, RuntimeError> {
    let result = match opcode {
        Opcode::BinaryAdd => a.checked_add(b),
        Opcode::BinarySubtract => a.checked_sub(b),
        Opcode::BinaryMultiply => a.checked_mul(b),
        Opcode::BinaryTrueDivide => {
            if b == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            return Ok(Value::float(a as f64 / b as f64));
        }
        Opcode::BinaryFloorDivide => {
            if b == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            a.checked_div(b).map(|q| {
                if a % b != 0 && (a < 0) != (b < 0) {
                    q - 1
                } else {
                    q
                }
            })
        }
        Opcode::BinaryModulo => {
            if b == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            a.checked_rem(b)
                .map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        Opcode::BinaryPower => {
            if b < 0 {
                if a == 0 {
                    return Err(RuntimeError::DivideByZero);
                }
                return Ok(Value::float((a as f64).powf(b as f64)));
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
        other => {
            return Err(RuntimeError::TypeError(format!(
                "{} is not a binary operator",
                other
            )))
        }
    };
    result.map(Value::Int).ok_or(RuntimeError::Overflow)
}

fn float_binary(opcode: Opcode, a: f64, b: f64) -> Result<f64, RuntimeError> {
    let divides = matches!(
        opcode,
        Opcode::BinaryTrueDivide | Opcode::BinaryFloorDivide | Opcode::BinaryModulo
    );
    if divides && b == 0.0 {
        return Err(RuntimeError::DivideByZero);
    }
    Ok(match opcode {
        Opcode::BinaryAdd => a + b,
        Opcode::BinarySubtract => a - b,
        Opcode::BinaryMultiply => a * b,
        Opcode::BinaryTrueDivide => a / b,
        Opcode::BinaryFloorDivide => (a / b).floor(),
        Opcode::BinaryModulo => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        Opcode::BinaryPower => a.powf(b),
        other => {
            return Err(RuntimeError::TypeError(format!(
                "{} is not a binary operator",
                other
            )))
        }
    })
}

/// `-a`
pub fn negate(value: Value) -> Result<Value, RuntimeError> {
    match Num::of(&value) {
        Some(Num::Int(n)) => n.checked_neg().map(Value::Int).ok_or(RuntimeError::Overflow),
        Some(Num::Float(x)) => Ok(Value::float(-x)),
        None => Err(RuntimeError::TypeError(format!(
            "bad operand type for unary -: '{}'",
            value.type_name()
        ))),
    }
}

/// Equality with numeric coercion (`1 == 1.0 == True`)
pub fn equals(a: &Value, b: &Value) -> bool {
    match (Num::of(a), Num::of(b)) {
        (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
        _ => match (a, b) {
            (Value::Tuple(x), Value::Tuple(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(a, b)| equals(a, b))
            }
            _ => a == b,
        },
    }
}

fn ordering(op: CompareOp, a: &Value, b: &Value) -> Result<Ordering, RuntimeError> {
    let order = match (Num::of(a), Num::of(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => Some(x.cmp(&y)),
        (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        _ => match (a, b) {
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            (Value::Tuple(x), Value::Tuple(y)) => {
                for (left, right) in x.iter().zip(y) {
                    if !equals(left, right) {
                        return ordering(op, left, right);
                    }
                }
                Some(x.len().cmp(&y.len()))
            }
            _ => {
                return Err(RuntimeError::TypeError(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    a.type_name(),
                    b.type_name()
                )))
            }
        },
    };
    // NaN compares false both ways
    Ok(order.unwrap_or(Ordering::Equal))
}

/// Apply a `COMPARE_OP` selector
pub fn compare(op: CompareOp, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let nan = matches!(a, Value::Float(x) if x.0.is_nan()) || matches!(b, Value::Float(x) if x.0.is_nan());
    let result = match op {
        CompareOp::Equal => equals(a, b),
        CompareOp::NotEqual => !equals(a, b),
        _ if nan => false,
        CompareOp::Less => ordering(op, a, b)? == Ordering::Less,
        CompareOp::LessEqual => ordering(op, a, b)? != Ordering::Greater,
        CompareOp::Greater => ordering(op, a, b)? == Ordering::Greater,
        CompareOp::GreaterEqual => ordering(op, a, b)? != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

/// Items of an iterable value
pub fn iterate(value: Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::Tuple(items) => Ok(items),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(RuntimeError::TypeError(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn arity(builtin: Builtin, args: &[Value], accepted: std::ops::RangeInclusive<usize>) -> Result<(), RuntimeError> {
    if accepted.contains(&args.len()) {
        Ok(())
    } else {
        Err(RuntimeError::ArgumentCount {
            function: builtin.name().to_string(),
            expected: *accepted.end(),
            given: args.len(),
        })
    }
}

fn extreme(builtin: Builtin, args: Vec<Value>, wanted: Ordering) -> Result<Value, RuntimeError> {
    let items = if args.len() == 1 {
        iterate(args.into_iter().next().unwrap_or(Value::None))?
    } else {
        args
    };
    let mut items = items.into_iter();
    let mut best = items.next().ok_or_else(|| {
        RuntimeError::TypeError(format!("{}() arg is an empty sequence", builtin.name()))
    })?;
    for item in items {
        if ordering(CompareOp::Less, &item, &best)? == wanted {
            best = item;
        }
    }
    Ok(best)
}

/// Call a builtin; `output` receives `print` lines
pub fn call_builtin(
    builtin: Builtin,
    args: Vec<Value>,
    output: &mut Vec<String>,
) -> Result<Value, RuntimeError> {
    match builtin {
        Builtin::Print => {
            let line: Vec<String> = args.iter().map(Value::to_string).collect();
            output.push(line.join(" "));
            Ok(Value::None)
        }
        Builtin::Len => {
            arity(builtin, &args, 1..=1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(RuntimeError::TypeError(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            }
        }
        Builtin::Abs => {
            arity(builtin, &args, 1..=1)?;
            match Num::of(&args[0]) {
                Some(Num::Int(n)) => n.checked_abs().map(Value::Int).ok_or(RuntimeError::Overflow),
                Some(Num::Float(x)) => Ok(Value::float(x.abs())),
                None => Err(RuntimeError::TypeError(format!(
                    "bad operand type for abs(): '{}'",
                    args[0].type_name()
                ))),
            }
        }
        Builtin::Min => extreme(builtin, args, Ordering::Less),
        Builtin::Max => extreme(builtin, args, Ordering::Greater),
        Builtin::Str => {
            arity(builtin, &args, 0..=1)?;
            Ok(Value::Str(args.first().map(Value::to_string).unwrap_or_default()))
        }
        Builtin::Int => {
            arity(builtin, &args, 0..=1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| {
                    RuntimeError::TypeError(format!("invalid literal for int(): '{}'", s))
                }),
                Some(other) => match Num::of(other) {
                    Some(Num::Int(n)) => Ok(Value::Int(n)),
                    Some(Num::Float(x)) if x.is_finite() => Ok(Value::Int(x.trunc() as i64)),
                    _ => Err(RuntimeError::TypeError(format!(
                        "int() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Builtin::Bool => {
            arity(builtin, &args, 0..=1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        Builtin::Range => {
            arity(builtin, &args, 1..=3)?;
            let mut bounds = Vec::with_capacity(args.len());
            for arg in &args {
                match Num::of(arg) {
                    Some(Num::Int(n)) => bounds.push(n),
                    _ => {
                        return Err(RuntimeError::TypeError(format!(
                            "'{}' object cannot be interpreted as an integer",
                            arg.type_name()
                        )))
                    }
                }
            }
            let (start, stop, step) = match bounds[..] {
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step] => (start, stop, step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(RuntimeError::TypeError("range() arg 3 must not be zero".to_string()));
            }
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(Value::Int(current));
                current = match current.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(Value::Tuple(items))
        }
    }
}
