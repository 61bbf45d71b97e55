//! Native method table for built-in value types.
//!
//! Maps (TypeTag, method_name) to an arity and an implementation. The
//! capability proxy consults the arity through `Value::responds_to` as the
//! last stage of every policy check; `call` is what a permitted invocation
//! finally runs.

use crate::value::{Block, RuntimeError, TypeTag, Value};
use std::cmp::Ordering;
use std::fmt;

/// Number of arguments a method accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Inclusive bounds
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::Range(min, max) => (min..=max).contains(&argc),
            Arity::AtLeast(min) => argc >= min,
        }
    }

    pub fn check(self, name: &str, argc: usize) -> Result<(), RuntimeError> {
        if self.accepts(argc) {
            Ok(())
        } else {
            Err(RuntimeError::ArgumentError {
                name: name.to_string(),
                given: argc,
                expected: self.to_string(),
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(min, max) => write!(f, "{}..{}", min, max),
            Arity::AtLeast(min) => write!(f, "{}+", min),
        }
    }
}

/// Registered native method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeMethod {
    pub name: &'static str,
    pub arity: Arity,
}

const fn native(name: &'static str, arity: Arity) -> NativeMethod {
    NativeMethod { name, arity }
}

use Arity::{AtLeast, Exact, Range};

/// Largest index `a[i] = v` grows an array to
pub const MAX_ARRAY_INDEX: usize = 1 << 20;

/// Largest string `+` and `*` build, in bytes
pub const MAX_STRING_BYTES: usize = 1 << 24;

/// Methods every value has
const OBJECT_METHODS: &[NativeMethod] = &[
    native("==", Exact(1)),
    native("!=", Exact(1)),
    native("!", Exact(0)),
    native("nil?", Exact(0)),
    native("equal?", Exact(1)),
    native("to_s", Exact(0)),
    native("inspect", Exact(0)),
    native("class", Exact(0)),
    native("is_a?", Exact(1)),
    native("kind_of?", Exact(1)),
    native("instance_of?", Exact(1)),
    native("respond_to?", Range(1, 2)),
    native("frozen?", Exact(0)),
    native("itself", Exact(0)),
    native("dup", Exact(0)),
];

const NIL_METHODS: &[NativeMethod] = &[native("to_a", Exact(0)), native("to_i", Exact(0))];

const BOOL_METHODS: &[NativeMethod] = &[
    native("&", Exact(1)),
    native("|", Exact(1)),
    native("^", Exact(1)),
];

const NUMERIC_METHODS: &[NativeMethod] = &[
    native("+", Exact(1)),
    native("-", Exact(1)),
    native("*", Exact(1)),
    native("/", Exact(1)),
    native("%", Exact(1)),
    native("**", Exact(1)),
    native("<", Exact(1)),
    native("<=", Exact(1)),
    native(">", Exact(1)),
    native(">=", Exact(1)),
    native("<=>", Exact(1)),
    native("-@", Exact(0)),
    native("+@", Exact(0)),
    native("abs", Exact(0)),
    native("zero?", Exact(0)),
    native("positive?", Exact(0)),
    native("negative?", Exact(0)),
    native("to_i", Exact(0)),
    native("to_f", Exact(0)),
    native("round", Exact(0)),
    native("floor", Exact(0)),
    native("ceil", Exact(0)),
];

const INTEGER_METHODS: &[NativeMethod] = &[
    native("succ", Exact(0)),
    native("pred", Exact(0)),
    native("even?", Exact(0)),
    native("odd?", Exact(0)),
    native("times", Exact(0)),
];

const STRING_METHODS: &[NativeMethod] = &[
    native("+", Exact(1)),
    native("*", Exact(1)),
    native("<", Exact(1)),
    native("<=", Exact(1)),
    native(">", Exact(1)),
    native(">=", Exact(1)),
    native("<=>", Exact(1)),
    native("[]", Exact(1)),
    native("length", Exact(0)),
    native("size", Exact(0)),
    native("upcase", Exact(0)),
    native("downcase", Exact(0)),
    native("capitalize", Exact(0)),
    native("reverse", Exact(0)),
    native("strip", Exact(0)),
    native("chars", Exact(0)),
    native("split", Range(0, 1)),
    native("empty?", Exact(0)),
    native("include?", Exact(1)),
    native("start_with?", Exact(1)),
    native("end_with?", Exact(1)),
    native("delete", Exact(1)),
    native("to_str", Exact(0)),
    native("to_sym", Exact(0)),
    native("to_i", Exact(0)),
    native("to_f", Exact(0)),
];

const SYMBOL_METHODS: &[NativeMethod] = &[
    native("<=>", Exact(1)),
    native("length", Exact(0)),
    native("size", Exact(0)),
    native("to_sym", Exact(0)),
];

const ARRAY_METHODS: &[NativeMethod] = &[
    native("[]", Exact(1)),
    native("[]=", Exact(2)),
    native("<<", Exact(1)),
    native("push", AtLeast(1)),
    native("pop", Exact(0)),
    native("delete", Exact(1)),
    native("length", Exact(0)),
    native("size", Exact(0)),
    native("empty?", Exact(0)),
    native("first", Exact(0)),
    native("last", Exact(0)),
    native("include?", Exact(1)),
    native("index", Exact(1)),
    native("join", Range(0, 1)),
    native("each", Exact(0)),
    native("each_with_index", Exact(0)),
    native("map", Exact(0)),
    native("collect", Exact(0)),
    native("select", Exact(0)),
    native("filter", Exact(0)),
    native("reject", Exact(0)),
    native("inject", Range(0, 2)),
    native("reduce", Range(0, 2)),
    native("sum", Exact(0)),
    native("min", Exact(0)),
    native("max", Exact(0)),
    native("sort", Exact(0)),
    native("reverse", Exact(0)),
    native("compact", Exact(0)),
    native("uniq", Exact(0)),
    native("to_a", Exact(0)),
];

const HASH_METHODS: &[NativeMethod] = &[
    native("[]", Exact(1)),
    native("[]=", Exact(2)),
    native("fetch", Range(1, 2)),
    native("key?", Exact(1)),
    native("has_key?", Exact(1)),
    native("include?", Exact(1)),
    native("delete", Exact(1)),
    native("keys", Exact(0)),
    native("values", Exact(0)),
    native("length", Exact(0)),
    native("size", Exact(0)),
    native("empty?", Exact(0)),
    native("each", Exact(0)),
    native("each_pair", Exact(0)),
    native("map", Exact(0)),
    native("merge", Exact(1)),
    native("to_a", Exact(0)),
];

fn tables_for(tag: TypeTag) -> &'static [&'static [NativeMethod]] {
    match tag {
        TypeTag::Nil => &[NIL_METHODS],
        TypeTag::Bool => &[BOOL_METHODS],
        TypeTag::Integer => &[INTEGER_METHODS, NUMERIC_METHODS],
        TypeTag::Float => &[NUMERIC_METHODS],
        TypeTag::String => &[STRING_METHODS],
        TypeTag::Symbol => &[SYMBOL_METHODS],
        TypeTag::Array => &[ARRAY_METHODS],
        TypeTag::Hash => &[HASH_METHODS],
        TypeTag::Object => &[],
    }
}

/// Find a native method for a type, falling back to the methods every
/// value has
pub fn lookup(tag: TypeTag, name: &str) -> Option<&'static NativeMethod> {
    tables_for(tag)
        .iter()
        .copied()
        .chain(std::iter::once(OBJECT_METHODS))
        .flat_map(|table| table.iter())
        .find(|method| method.name == name)
}

/// Call a native method on `receiver`. The receiver is used through
/// `Value::raw`, so this never consults the policy.
pub fn call(
    receiver: &Value,
    name: &str,
    args: &[Value],
    block: Option<&Block>,
) -> Result<Value, RuntimeError> {
    let recv = receiver.raw();
    let method = lookup(recv.type_tag(), name).ok_or_else(|| no_method(recv, name))?;
    method.arity.check(name, args.len())?;

    let typed = match recv {
        Value::Nil => nil_method(name),
        Value::Bool(b) => bool_method(*b, name, args),
        Value::Integer(_) | Value::Float(_) => numeric_method(recv, name, args, block),
        Value::String(s) => string_method(s, name, args),
        Value::Symbol(s) => symbol_method(s, name, args),
        Value::Array(_) => array_method(recv, name, args, block),
        Value::Hash(_) => hash_method(recv, name, args, block),
        Value::Object(_) | Value::Proxy(_) => None,
    };
    match typed {
        Some(result) => result,
        None => object_method(recv, name, args),
    }
}

fn no_method(recv: &Value, name: &str) -> RuntimeError {
    RuntimeError::NoMethod {
        name: name.to_string(),
        receiver: recv.inspect(),
    }
}

fn no_block(name: &str) -> RuntimeError {
    RuntimeError::Block {
        msg: format!("no block given to '{}'", name),
    }
}

fn conversion_error(value: &Value, into: &str) -> RuntimeError {
    RuntimeError::type_error(format!(
        "no implicit conversion of {} into {}",
        value.class_name(),
        into
    ))
}

/// Name of the type a class argument denotes: a class object, or a type
/// name given as string or symbol
fn type_argument(arg: &Value) -> Result<String, RuntimeError> {
    match arg.raw() {
        Value::String(s) | Value::Symbol(s) => Ok(s.to_string()),
        other => other
            .constant_name()
            .ok_or_else(|| RuntimeError::type_error("class or module required")),
    }
}

fn method_name_argument(arg: &Value) -> Result<String, RuntimeError> {
    match arg.raw() {
        Value::String(s) | Value::Symbol(s) => Ok(s.to_string()),
        other => Err(RuntimeError::type_error(format!(
            "{} is not a symbol nor a string",
            other.inspect()
        ))),
    }
}

fn object_method(recv: &Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let value = match (name, args) {
        ("==", [other]) => Value::Bool(recv == other),
        ("!=", [other]) => Value::Bool(recv != other),
        ("!", []) => Value::Bool(!recv.truthy()),
        ("nil?", []) => Value::Bool(matches!(recv, Value::Nil)),
        ("equal?", [other]) => Value::Bool(recv.identity() == other.identity()),
        ("to_s", []) => Value::string(recv.to_string()),
        ("inspect", []) => Value::string(recv.inspect()),
        ("class", []) => Value::class_ref(recv.class_name()),
        ("is_a?" | "kind_of?", [arg]) => Value::Bool(recv.is_a(&type_argument(arg)?)),
        ("instance_of?", [arg]) => {
            let type_name = type_argument(arg)?;
            Value::Bool(recv.class_name() == type_name.trim_start_matches("::"))
        }
        ("respond_to?", [method, ..]) => {
            Value::Bool(recv.method_arity(&method_name_argument(method)?).is_some())
        }
        ("frozen?", []) => Value::Bool(!matches!(recv, Value::Array(_) | Value::Hash(_))),
        ("itself", []) => recv.clone(),
        ("dup", []) => match recv {
            Value::Array(items) => Value::array(items.snapshot()),
            Value::Hash(pairs) => Value::hash(pairs.snapshot()),
            other => other.clone(),
        },
        _ => return Err(no_method(recv, name)),
    };
    Ok(value)
}

fn nil_method(name: &str) -> Option<Result<Value, RuntimeError>> {
    match name {
        "to_a" => Some(Ok(Value::array(Vec::new()))),
        "to_i" => Some(Ok(Value::Integer(0))),
        _ => None,
    }
}

fn bool_method(b: bool, name: &str, args: &[Value]) -> Option<Result<Value, RuntimeError>> {
    let other = args.first().map(Value::truthy)?;
    match name {
        "&" => Some(Ok(Value::Bool(b && other))),
        "|" => Some(Ok(Value::Bool(b || other))),
        "^" => Some(Ok(Value::Bool(b != other))),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value.raw() {
            Value::Integer(n) => Some(Num::Int(*n)),
            Value::Float(x) => Some(Num::Float(*x)),
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

fn overflow() -> RuntimeError {
    RuntimeError::type_error("integer overflow")
}

/// Integer division rounding toward negative infinity
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn arithmetic(op: &str, lhs: Num, rhs: &Value) -> Result<Value, RuntimeError> {
    let rhs_num = Num::of(rhs).ok_or_else(|| {
        RuntimeError::type_error(format!("{} can't be coerced into a number", rhs.class_name()))
    })?;
    match (lhs, rhs_num) {
        (Num::Int(a), Num::Int(b)) => {
            let result = match op {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                "/" if b == 0 => return Err(RuntimeError::DivideByZero),
                "/" => floor_div(a, b),
                "%" if b == 0 => return Err(RuntimeError::DivideByZero),
                "%" => floor_mod(a, b),
                "**" if b < 0 => return Ok(Value::Float((a as f64).powf(b as f64))),
                "**" => u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)),
                _ => None,
            };
            result.map(Value::Integer).ok_or_else(overflow)
        }
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            let result = match op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "/" => a / b,
                "%" => a - b * (a / b).floor(),
                _ => a.powf(b),
            };
            Ok(Value::Float(result))
        }
    }
}

/// Ordering between two comparable values (numbers, strings, symbols)
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a.raw(), b.raw()) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) | (Value::Symbol(x), Value::Symbol(y)) => {
            Some(x.cmp(y))
        }
        (x, y) => Num::of(x)?.as_f64().partial_cmp(&Num::of(y)?.as_f64()),
    }
}

fn comparison_failed(a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "comparison of {} with {} failed",
        a.class_name(),
        b.inspect()
    ))
}

fn relational(name: &str, a: &Value, b: &Value) -> Option<Result<Value, RuntimeError>> {
    let ordering = match name {
        "<" | "<=" | ">" | ">=" => compare(a, b),
        "<=>" => return Some(Ok(compare(a, b).map_or(Value::Nil, |o| Value::Integer(o as i64)))),
        _ => return None,
    };
    let Some(ordering) = ordering else {
        return Some(Err(comparison_failed(a, b)));
    };
    let result = match name {
        "<" => ordering == Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Some(Ok(Value::Bool(result)))
}

fn numeric_method(
    recv: &Value,
    name: &str,
    args: &[Value],
    block: Option<&Block>,
) -> Option<Result<Value, RuntimeError>> {
    let num = Num::of(recv)?;
    if let [rhs] = args {
        return match name {
            "+" | "-" | "*" | "/" | "%" | "**" => Some(arithmetic(name, num, rhs)),
            _ => relational(name, recv, rhs),
        };
    }

    let value = match (name, num) {
        ("-@", Num::Int(n)) => n.checked_neg().map(Value::Integer).ok_or_else(overflow),
        ("-@", Num::Float(x)) => Ok(Value::Float(-x)),
        ("+@", _) => Ok(recv.clone()),
        ("abs", Num::Int(n)) => n.checked_abs().map(Value::Integer).ok_or_else(overflow),
        ("abs", Num::Float(x)) => Ok(Value::Float(x.abs())),
        ("zero?", n) => Ok(Value::Bool(n.as_f64() == 0.0)),
        ("positive?", n) => Ok(Value::Bool(n.as_f64() > 0.0)),
        ("negative?", n) => Ok(Value::Bool(n.as_f64() < 0.0)),
        ("to_i" | "round" | "floor" | "ceil", Num::Int(n)) => Ok(Value::Integer(n)),
        ("to_i", Num::Float(x)) => Ok(Value::Integer(x.trunc() as i64)),
        ("round", Num::Float(x)) => Ok(Value::Integer(x.round() as i64)),
        ("floor", Num::Float(x)) => Ok(Value::Integer(x.floor() as i64)),
        ("ceil", Num::Float(x)) => Ok(Value::Integer(x.ceil() as i64)),
        ("to_f", n) => Ok(Value::Float(n.as_f64())),
        ("succ", Num::Int(n)) => n.checked_add(1).map(Value::Integer).ok_or_else(overflow),
        ("pred", Num::Int(n)) => n.checked_sub(1).map(Value::Integer).ok_or_else(overflow),
        ("even?", Num::Int(n)) => Ok(Value::Bool(n % 2 == 0)),
        ("odd?", Num::Int(n)) => Ok(Value::Bool(n % 2 != 0)),
        ("times", Num::Int(n)) => times(recv, n, block),
        _ => return None,
    };
    Some(value)
}

fn times(recv: &Value, n: i64, block: Option<&Block>) -> Result<Value, RuntimeError> {
    let block = block.ok_or_else(|| no_block("times"))?;
    for i in 0..n.max(0) {
        block.call(&[Value::Integer(i)])?;
    }
    Ok(recv.clone())
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Result<Value, RuntimeError>> {
    let recv = Value::string(s);
    let value = match (name, args) {
        ("+", [other]) => match other.raw() {
            Value::String(rhs) => s
                .len()
                .checked_add(rhs.len())
                .filter(|bytes| *bytes <= MAX_STRING_BYTES)
                .map(|_| Value::string(format!("{}{}", s, rhs)))
                .ok_or_else(string_too_long),
            rhs => Err(conversion_error(rhs, "String")),
        },
        ("*", [other]) => match other.raw() {
            Value::Integer(n) if *n >= 0 => repeat(s, *n),
            Value::Integer(_) => Err(RuntimeError::type_error("negative argument")),
            rhs => Err(conversion_error(rhs, "Integer")),
        },
        ("[]", [index]) => match index.raw() {
            Value::Integer(i) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(resolve_index(*i, chars.len())
                    .map_or(Value::Nil, |i| Value::string(chars[i].to_string())))
            }
            other => Err(conversion_error(other, "Integer")),
        },
        ("length" | "size", []) => Ok(Value::Integer(s.chars().count() as i64)),
        ("upcase", []) => Ok(Value::string(s.to_uppercase())),
        ("downcase", []) => Ok(Value::string(s.to_lowercase())),
        ("capitalize", []) => {
            let mut chars = s.chars();
            let capitalized = match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.as_str().to_lowercase().chars())
                    .collect(),
                None => String::new(),
            };
            Ok(Value::string(capitalized))
        }
        ("reverse", []) => Ok(Value::string(s.chars().rev().collect::<String>())),
        ("strip", []) => Ok(Value::string(s.trim())),
        ("chars", []) => Ok(Value::array(
            s.chars().map(|c| Value::string(c.to_string())).collect(),
        )),
        ("split", []) => Ok(Value::array(s.split_whitespace().map(Value::string).collect())),
        ("split", [sep]) => match sep.raw() {
            Value::String(sep) => Ok(Value::array(s.split(sep.as_ref()).map(Value::string).collect())),
            other => Err(conversion_error(other, "String")),
        },
        ("empty?", []) => Ok(Value::Bool(s.is_empty())),
        ("include?" | "start_with?" | "end_with?" | "delete", [other]) => match other.raw() {
            Value::String(needle) => Ok(match name {
                "include?" => Value::Bool(s.contains(needle.as_ref())),
                "start_with?" => Value::Bool(s.starts_with(needle.as_ref())),
                "end_with?" => Value::Bool(s.ends_with(needle.as_ref())),
                _ => Value::string(s.chars().filter(|c| !needle.contains(*c)).collect::<String>()),
            }),
            rhs => Err(conversion_error(rhs, "String")),
        },
        ("to_str", []) => Ok(recv.clone()),
        ("to_sym", []) => Ok(Value::symbol(s)),
        ("to_i", []) => Ok(Value::Integer(leading_integer(s))),
        ("to_f", []) => Ok(Value::Float(s.trim().parse().unwrap_or(0.0))),
        (_, [other]) => return relational(name, &recv, other),
        _ => return None,
    };
    Some(value)
}

fn string_too_long() -> RuntimeError {
    RuntimeError::SizeLimitExceeded {
        what: "string".to_string(),
        limit: MAX_STRING_BYTES,
    }
}

fn repeat(s: &str, times: i64) -> Result<Value, RuntimeError> {
    let times = usize::try_from(times).map_err(|_| string_too_long())?;
    s.len()
        .checked_mul(times)
        .filter(|bytes| *bytes <= MAX_STRING_BYTES)
        .map(|_| Value::string(s.repeat(times)))
        .ok_or_else(string_too_long)
}

/// `"42abc".to_i` is 42, `"abc".to_i` is 0
fn leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map_or(0, |n| sign * n)
}

fn symbol_method(s: &str, name: &str, args: &[Value]) -> Option<Result<Value, RuntimeError>> {
    match (name, args) {
        ("length" | "size", []) => Some(Ok(Value::Integer(s.chars().count() as i64))),
        ("to_sym", []) => Some(Ok(Value::symbol(s))),
        ("<=>", [other]) => relational(name, &Value::symbol(s), other),
        _ => None,
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Slot written by `a[i] = v`. Negative indices count from the end; positive
/// ones may grow the array up to `MAX_ARRAY_INDEX`.
fn assignment_slot(index: i64, len: usize) -> Result<usize, RuntimeError> {
    if index < 0 {
        return resolve_index(index, len).ok_or_else(|| {
            RuntimeError::type_error(format!("index {} too small for array", index))
        });
    }
    usize::try_from(index)
        .ok()
        .filter(|slot| *slot <= MAX_ARRAY_INDEX)
        .ok_or_else(|| RuntimeError::SizeLimitExceeded {
            what: format!("array index {}", index),
            limit: MAX_ARRAY_INDEX,
        })
}

fn array_method(
    recv: &Value,
    name: &str,
    args: &[Value],
    block: Option<&Block>,
) -> Option<Result<Value, RuntimeError>> {
    let Value::Array(items) = recv else {
        return None;
    };
    let value = match (name, args) {
        ("[]", [index]) => match index.raw() {
            Value::Integer(i) => Ok(items.with(|v| {
                resolve_index(*i, v.len()).map_or(Value::Nil, |i| v[i].clone())
            })),
            other => Err(conversion_error(other, "Integer")),
        },
        ("[]=", [index, value]) => match index.raw() {
            Value::Integer(i) => items.with_mut(|v| -> Result<Value, RuntimeError> {
                let slot = assignment_slot(*i, v.len())?;
                if slot >= v.len() {
                    v.resize(slot + 1, Value::Nil);
                }
                v[slot] = value.clone();
                Ok(value.clone())
            }),
            other => Err(conversion_error(other, "Integer")),
        },
        ("<<" | "push", values) => {
            items.with_mut(|v| v.extend(values.iter().cloned()));
            Ok(recv.clone())
        }
        ("pop", []) => Ok(items.with_mut(|v| v.pop()).unwrap_or(Value::Nil)),
        ("delete", [target]) => {
            // compare outside the lock: an element may be this array
            let snapshot = items.snapshot();
            let before = snapshot.len();
            let kept: Vec<Value> = snapshot.into_iter().filter(|item| item != target).collect();
            let removed = kept.len() < before;
            if removed {
                items.with_mut(|v| *v = kept);
            }
            Ok(if removed { target.clone() } else { Value::Nil })
        }
        ("length" | "size", []) => Ok(Value::Integer(items.with(|v| v.len()) as i64)),
        ("empty?", []) => Ok(Value::Bool(items.with(|v| v.is_empty()))),
        ("first", []) => Ok(items.with(|v| v.first().cloned()).unwrap_or(Value::Nil)),
        ("last", []) => Ok(items.with(|v| v.last().cloned()).unwrap_or(Value::Nil)),
        ("include?", [target]) => Ok(Value::Bool(items.snapshot().iter().any(|item| item == target))),
        ("index", [target]) => Ok(items
            .snapshot()
            .iter()
            .position(|item| item == target)
            .map_or(Value::Nil, |i| Value::Integer(i as i64))),
        ("join", sep) => {
            let sep = match sep.first().map(Value::raw) {
                Some(Value::String(sep)) => sep.to_string(),
                Some(other) => return Some(Err(conversion_error(other, "String"))),
                None => String::new(),
            };
            let parts: Vec<String> = items.snapshot().iter().map(Value::to_string).collect();
            Ok(Value::string(parts.join(&sep)))
        }
        ("each", []) => {
            let block = match block {
                Some(block) => block,
                None => return Some(Err(no_block(name))),
            };
            items
                .snapshot()
                .into_iter()
                .try_for_each(|item| block.call(&[item]).map(drop))
                .map(|_| recv.clone())
        }
        ("each_with_index", []) => {
            let block = match block {
                Some(block) => block,
                None => return Some(Err(no_block(name))),
            };
            items
                .snapshot()
                .into_iter()
                .enumerate()
                .try_for_each(|(i, item)| block.call(&[item, Value::Integer(i as i64)]).map(drop))
                .map(|_| recv.clone())
        }
        ("map" | "collect", []) => match block {
            Some(block) => items
                .snapshot()
                .into_iter()
                .map(|item| block.call(&[item]))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::array),
            None => Err(no_block(name)),
        },
        ("select" | "filter" | "reject", []) => match block {
            Some(block) => select(items.snapshot(), block, name != "reject"),
            None => Err(no_block(name)),
        },
        ("inject" | "reduce", args) => inject(items.snapshot(), args, block),
        ("sum", []) => items
            .snapshot()
            .iter()
            .try_fold(Value::Integer(0), |sum, item| match Num::of(&sum) {
                Some(num) => arithmetic("+", num, item),
                None => Err(conversion_error(item, "Integer")),
            }),
        ("min" | "max", []) => {
            let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<Value> = None;
            for item in items.snapshot() {
                best = match best {
                    None => Some(item),
                    Some(current) => match compare(&item, &current) {
                        Some(ordering) if ordering == want => Some(item),
                        Some(_) => Some(current),
                        None => return Some(Err(comparison_failed(&item, &current))),
                    },
                };
            }
            Ok(best.unwrap_or(Value::Nil))
        }
        ("sort", []) => {
            let mut sorted = items.snapshot();
            let mut failure = None;
            sorted.sort_by(|a, b| {
                compare(a, b).unwrap_or_else(|| {
                    failure.get_or_insert_with(|| comparison_failed(a, b));
                    Ordering::Equal
                })
            });
            match failure {
                Some(err) => Err(err),
                None => Ok(Value::array(sorted)),
            }
        }
        ("reverse", []) => Ok(Value::array(items.snapshot().into_iter().rev().collect())),
        ("compact", []) => Ok(Value::array(
            items
                .snapshot()
                .into_iter()
                .filter(|item| !matches!(item.raw(), Value::Nil))
                .collect(),
        )),
        ("uniq", []) => {
            let mut unique: Vec<Value> = Vec::new();
            for item in items.snapshot() {
                if !unique.iter().any(|seen| seen.key_eq(&item)) {
                    unique.push(item);
                }
            }
            Ok(Value::array(unique))
        }
        ("to_a", []) => Ok(recv.clone()),
        _ => return None,
    };
    Some(value)
}

fn select(items: Vec<Value>, block: &Block, keep: bool) -> Result<Value, RuntimeError> {
    let mut selected = Vec::new();
    for item in items {
        if block.call(std::slice::from_ref(&item))?.truthy() == keep {
            selected.push(item);
        }
    }
    Ok(Value::array(selected))
}

/// `inject { |memo, x| }`, `inject(init) { }`, `inject(:+)`, `inject(init, :+)`
fn inject(items: Vec<Value>, args: &[Value], block: Option<&Block>) -> Result<Value, RuntimeError> {
    let (init, op) = match (args, block) {
        ([], Some(_)) => (None, None),
        ([init], Some(_)) => (Some(init.clone()), None),
        ([op], None) => (None, Some(method_name_argument(op)?)),
        ([init, op], None) => (Some(init.clone()), Some(method_name_argument(op)?)),
        _ => return Err(no_block("inject")),
    };

    let mut iter = items.into_iter();
    let Some(mut memo) = init.or_else(|| iter.next()) else {
        return Ok(Value::Nil);
    };
    for item in iter {
        memo = match (&op, block) {
            (Some(op), _) => memo.invoke(op, &[item], None)?,
            (None, Some(block)) => block.call(&[memo, item])?,
            (None, None) => return Err(no_block("inject")),
        };
    }
    Ok(memo)
}

fn hash_method(
    recv: &Value,
    name: &str,
    args: &[Value],
    block: Option<&Block>,
) -> Option<Result<Value, RuntimeError>> {
    let Value::Hash(pairs) = recv else {
        return None;
    };
    // Keys are compared on a snapshot; a key may be this hash.
    let position = |key: &Value| pairs.snapshot().iter().position(|(k, _)| k.key_eq(key));
    let find = |key: &Value| {
        pairs
            .snapshot()
            .into_iter()
            .find(|(k, _)| k.key_eq(key))
            .map(|(_, value)| value)
    };
    let value = match (name, args) {
        ("[]", [key]) => Ok(find(key).unwrap_or(Value::Nil)),
        ("[]=", [key, value]) => {
            let index = position(key);
            pairs.with_mut(|v| match index.and_then(|i| v.get_mut(i)) {
                Some(entry) => entry.1 = value.clone(),
                None => v.push((key.clone(), value.clone())),
            });
            Ok(value.clone())
        }
        ("fetch", [key, rest @ ..]) => match (find(key), rest.first()) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default.clone()),
            (None, None) => Err(RuntimeError::Block {
                msg: format!("key not found: {}", key.inspect()),
            }),
        },
        ("key?" | "has_key?" | "include?", [key]) => Ok(Value::Bool(find(key).is_some())),
        ("delete", [key]) => Ok(position(key)
            .and_then(|index| pairs.with_mut(|v| (index < v.len()).then(|| v.remove(index).1)))
            .unwrap_or(Value::Nil)),
        ("keys", []) => Ok(Value::array(pairs.snapshot().into_iter().map(|(k, _)| k).collect())),
        ("values", []) => Ok(Value::array(pairs.snapshot().into_iter().map(|(_, v)| v).collect())),
        ("length" | "size", []) => Ok(Value::Integer(pairs.with(|v| v.len()) as i64)),
        ("empty?", []) => Ok(Value::Bool(pairs.with(|v| v.is_empty()))),
        ("each" | "each_pair", []) => match block {
            Some(block) => pairs
                .snapshot()
                .into_iter()
                .try_for_each(|(k, v)| block.call(&[k, v]).map(drop))
                .map(|_| recv.clone()),
            None => Err(no_block(name)),
        },
        ("map", []) => match block {
            Some(block) => pairs
                .snapshot()
                .into_iter()
                .map(|(k, v)| block.call(&[k, v]))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::array),
            None => Err(no_block(name)),
        },
        ("merge", [other]) => match other.raw() {
            Value::Hash(other) => {
                let mut merged = pairs.snapshot();
                for (key, value) in other.snapshot() {
                    match merged.iter_mut().find(|(k, _)| k.key_eq(&key)) {
                        Some(entry) => entry.1 = value,
                        None => merged.push((key, value)),
                    }
                }
                Ok(Value::hash(merged))
            }
            rhs => Err(conversion_error(rhs, "Hash")),
        },
        ("to_a", []) => Ok(Value::array(
            pairs
                .snapshot()
                .into_iter()
                .map(|(k, v)| Value::array(vec![k, v]))
                .collect(),
        )),
        _ => return None,
    };
    Some(value)
}
