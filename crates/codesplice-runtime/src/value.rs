//! Runtime values
//!
//! Literals stored in a routine's constant table, bindings in a resolution
//! context, and everything the reference VM pushes on its stack.

use crate::code::CodeObject;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Callables that are always available, whatever the namespace holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Print,
    Len,
    Abs,
    Min,
    Max,
    Str,
    Int,
    Bool,
    Range,
}

impl Builtin {
    /// Every builtin
    pub const ALL: [Builtin; 9] = [
        Builtin::Print,
        Builtin::Len,
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::Str,
        Builtin::Int,
        Builtin::Bool,
        Builtin::Range,
    ];

    /// Name the builtin is bound to
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Bool => "bool",
            Builtin::Range => "range",
        }
    }

    /// Look a builtin up by name
    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Returns true if `name` is bound to a builtin
    pub fn is_builtin(name: &str) -> bool {
        Builtin::from_name(name).is_some()
    }
}

/// A value
///
/// Equality is structural and total (floats compare through `OrderedFloat`),
/// which is what constant-table deduplication relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Tuple(Vec<Value>),
    Builtin(Builtin),
    Function(Arc<CodeObject>),
}

impl Value {
    /// Shorthand for a float value
    pub fn float(value: f64) -> Self {
        Value::Float(OrderedFloat(value))
    }

    /// Shorthand for a string value
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    /// Truthiness used by conditional jumps
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => f.0 != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Builtin(_) | Value::Function(_) => true,
        }
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::Builtin(_) => "builtin_function",
            Value::Function(_) => "function",
        }
    }

    /// Quoted representation, used inside tuples and listings
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                if x.0.fract() == 0.0 && x.0.is_finite() {
                    write!(f, "{:.1}", x.0)
                } else {
                    write!(f, "{}", x.0)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                if parts.len() == 1 {
                    write!(f, "({},)", parts[0])
                } else {
                    write!(f, "({})", parts.join(", "))
                }
            }
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Function(code) => write!(f, "<function {}>", code.qualified_name),
        }
    }
}

/// Errors raised while executing a routine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("local variable '{0}' referenced before assignment")]
    UnboundLocal(String),

    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("stack underflow at offset {0}")]
    StackUnderflow(usize),

    #[error("'{0}' object is not callable")]
    NotCallable(&'static str),

    #[error("{function}() takes {expected} positional arguments but {given} were given")]
    ArgumentCount {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("maximum call depth exceeded")]
    RecursionLimit,

    #[error("routine ran off the end of its instruction stream")]
    MissingReturn,

    #[error("cannot decode instruction: {0}")]
    Decode(#[from] crate::error::RewriteError),
}
