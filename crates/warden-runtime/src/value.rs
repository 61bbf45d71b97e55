//! Runtime value representation
//!
//! Values the host hands to a sandboxed script, and everything a script
//! derives from them.
//! - Nil, Bool, Integer, Float: immediate values
//! - String, Symbol: reference-counted, immutable
//! - Array, Hash: shared mutable containers (`Shared<T>`), reference semantics
//! - Object: host-defined objects behind the [`HostObject`] trait
//! - Proxy: a capability proxy wrapping any of the above

use crate::method_dispatch::{self, Arity};
use crate::proxy::Proxy;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Nesting depth after which `inspect` stops descending into containers
const MAX_INSPECT_DEPTH: usize = 32;

/// Nesting depth after which equality gives up on containers that are not
/// the same allocation
const MAX_COMPARE_DEPTH: usize = 32;

/// Shared mutable container. Cheap to clone (refcount bump); every clone sees
/// every mutation.
#[derive(Clone, Debug)]
pub struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Arc::new(Mutex::new(value)))
    }

    /// Acquire the lock and apply a read function.
    ///
    /// A lock poisoned by a panicking block still holds consistent data for
    /// the containers stored here, so the guard is recovered.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    /// Acquire the lock and apply a mutation function.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    /// Address of the shared allocation
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Shared<T> {
    /// Copy of the current contents. Callbacks that may re-enter the same
    /// container (blocks, nested comparisons) work on a snapshot.
    pub fn snapshot(&self) -> T {
        self.with(|inner| inner.clone())
    }
}

pub type ValueArray = Shared<Vec<Value>>;

/// Insertion-ordered hash storage
pub type ValueHash = Shared<Vec<(Value, Value)>>;

/// Block function type - Rust closure standing in for a script block
pub type BlockFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Block passed along with a method call
#[derive(Clone)]
pub struct Block(BlockFn);

impl Block {
    pub fn new(f: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static) -> Self {
        Block(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.0)(args)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<block>")
    }
}

/// Object implemented by the host application
///
/// Class and module objects report the constant they are bound to through
/// `constant_name`; the proxy checks it against the allowed constants.
pub trait HostObject: Send + Sync + fmt::Debug {
    fn class_name(&self) -> &str;

    /// Type names this object is an instance of, most specific first
    fn ancestors(&self) -> Vec<String> {
        builtin_ancestors(self.class_name(), &[])
    }

    fn constant_name(&self) -> Option<&str> {
        None
    }

    /// Arity of a method the object implements, `None` when it has no such
    /// method
    fn method_arity(&self, name: &str) -> Option<Arity>;

    fn call(&self, name: &str, args: &[Value], block: Option<&Block>) -> Result<Value, RuntimeError>;
}

/// Class reference returned by `class`, e.g. `"x".class`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    name: String,
}

impl ClassRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl HostObject for ClassRef {
    fn class_name(&self) -> &str {
        "Class"
    }

    fn ancestors(&self) -> Vec<String> {
        builtin_ancestors("Class", &["Module"])
    }

    fn constant_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn method_arity(&self, name: &str) -> Option<Arity> {
        match name {
            "name" => Some(Arity::Exact(0)),
            _ => None,
        }
    }

    fn call(&self, name: &str, args: &[Value], _block: Option<&Block>) -> Result<Value, RuntimeError> {
        match (name, args) {
            ("name", []) => Ok(Value::string(self.name.as_str())),
            _ => Err(RuntimeError::NoMethod {
                name: name.to_string(),
                receiver: self.name.clone(),
            }),
        }
    }
}

/// Ancestor chain for a built-in class: the class, its mixins, then the
/// common root
pub fn builtin_ancestors(class: &str, mixins: &[&str]) -> Vec<String> {
    std::iter::once(class)
        .chain(mixins.iter().copied())
        .chain(["Object", "Kernel", "BasicObject"])
        .map(str::to_string)
        .collect()
}

/// Coarse runtime type of a value. Proxies report the type of the value
/// they wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Nil,
    Bool,
    Integer,
    Float,
    String,
    Symbol,
    Array,
    Hash,
    Object,
}

impl TypeTag {
    /// Primitives pass through `handle` unwrapped unless a type rule
    /// covers them
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            TypeTag::Nil
                | TypeTag::Bool
                | TypeTag::Integer
                | TypeTag::Float
                | TypeTag::String
                | TypeTag::Symbol
        )
    }
}

/// Identity of a value, used to key per-instance policy rules.
/// Immediates are identified by value, everything else by allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(u64),
    Symbol(Arc<str>),
    Ref(usize),
}

/// Runtime value type
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Symbol(Arc<str>),
    Array(ValueArray),
    Hash(ValueHash),
    Object(Arc<dyn HostObject>),
    Proxy(Arc<Proxy>),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn symbol(s: impl Into<Arc<str>>) -> Self {
        Value::Symbol(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Shared::new(items))
    }

    pub fn hash(pairs: Vec<(Value, Value)>) -> Self {
        Value::Hash(Shared::new(pairs))
    }

    pub fn object(object: impl HostObject + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    pub fn class_ref(name: impl Into<String>) -> Self {
        Value::object(ClassRef::new(name))
    }

    /// The value itself, or the value a proxy wraps
    pub fn raw(&self) -> &Value {
        match self {
            Value::Proxy(proxy) => proxy.target(),
            other => other,
        }
    }

    /// Owned form of [`Value::raw`]
    pub fn unwrapped(&self) -> Value {
        self.raw().clone()
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Value::Proxy(_))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self.raw() {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::String(_) => TypeTag::String,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::Array(_) => TypeTag::Array,
            Value::Hash(_) => TypeTag::Hash,
            Value::Object(_) | Value::Proxy(_) => TypeTag::Object,
        }
    }

    /// Name of the value's real class
    pub fn class_name(&self) -> String {
        match self.raw() {
            Value::Nil => "NilClass".to_string(),
            Value::Bool(true) => "TrueClass".to_string(),
            Value::Bool(false) => "FalseClass".to_string(),
            Value::Integer(_) => "Integer".to_string(),
            Value::Float(_) => "Float".to_string(),
            Value::String(_) => "String".to_string(),
            Value::Symbol(_) => "Symbol".to_string(),
            Value::Array(_) => "Array".to_string(),
            Value::Hash(_) => "Hash".to_string(),
            Value::Object(object) => object.class_name().to_string(),
            Value::Proxy(_) => "Object".to_string(),
        }
    }

    pub fn ancestors(&self) -> Vec<String> {
        let class = self.class_name();
        match self.raw() {
            Value::Integer(_) | Value::Float(_) => builtin_ancestors(&class, &["Numeric", "Comparable"]),
            Value::String(_) | Value::Symbol(_) => builtin_ancestors(&class, &["Comparable"]),
            Value::Array(_) | Value::Hash(_) => builtin_ancestors(&class, &["Enumerable"]),
            Value::Object(object) => object.ancestors(),
            _ => builtin_ancestors(&class, &[]),
        }
    }

    /// Whether the value is an instance of the named type (class or mixin)
    pub fn is_a(&self, type_name: &str) -> bool {
        let type_name = type_name.trim_start_matches("::");
        self.ancestors().iter().any(|ancestor| ancestor == type_name)
    }

    /// Constant a class or module object is bound to
    pub fn constant_name(&self) -> Option<String> {
        match self.raw() {
            Value::Object(object) => object.constant_name().map(str::to_string),
            _ => None,
        }
    }

    pub fn identity(&self) -> Identity {
        match self.raw() {
            Value::Nil => Identity::Nil,
            Value::Bool(b) => Identity::Bool(*b),
            Value::Integer(n) => Identity::Integer(*n),
            Value::Float(x) => Identity::Float(x.to_bits()),
            Value::Symbol(s) => Identity::Symbol(Arc::clone(s)),
            Value::String(s) => Identity::Ref(Arc::as_ptr(s) as *const u8 as usize),
            Value::Array(items) => Identity::Ref(items.addr()),
            Value::Hash(pairs) => Identity::Ref(pairs.addr()),
            Value::Object(object) => Identity::Ref(Arc::as_ptr(object) as *const () as usize),
            Value::Proxy(proxy) => Identity::Ref(Arc::as_ptr(proxy) as usize),
        }
    }

    /// Everything except `nil` and `false` is truthy
    pub fn truthy(&self) -> bool {
        !matches!(self.raw(), Value::Nil | Value::Bool(false))
    }

    /// Whether the value natively implements `name` for `argc` arguments.
    /// This is the last stage of the policy check and ignores policy.
    pub fn responds_to(&self, name: &str, argc: usize) -> bool {
        self.method_arity(name)
            .is_some_and(|arity| arity.accepts(argc))
    }

    /// Arity of the method the value implements under `name`
    pub fn method_arity(&self, name: &str) -> Option<Arity> {
        match self.raw() {
            Value::Object(object) => object
                .method_arity(name)
                .or_else(|| method_dispatch::lookup(TypeTag::Object, name).map(|m| m.arity)),
            raw => method_dispatch::lookup(raw.type_tag(), name).map(|method| method.arity),
        }
    }

    /// Invoke a method. Proxies check the policy first; everything else
    /// dispatches directly.
    pub fn invoke(&self, name: &str, args: &[Value], block: Option<&Block>) -> Result<Value, RuntimeError> {
        match self {
            Value::Proxy(proxy) => proxy.invoke(name, args, block),
            Value::Object(object) => match object.method_arity(name) {
                Some(arity) => {
                    arity.check(name, args.len())?;
                    object.call(name, args, block)
                }
                None => method_dispatch::call(self, name, args, block),
            },
            _ => method_dispatch::call(self, name, args, block),
        }
    }

    /// Ruby-style `inspect` text
    pub fn inspect(&self) -> String {
        self.inspect_at(0)
    }

    fn inspect_at(&self, depth: usize) -> String {
        match self.raw() {
            Value::Nil => "nil".to_string(),
            Value::String(s) => format!("{:?}", s.as_ref()),
            Value::Symbol(s) => format!(":{}", s),
            Value::Array(_) | Value::Hash(_) if depth >= MAX_INSPECT_DEPTH => "[...]".to_string(),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .snapshot()
                    .iter()
                    .map(|item| item.inspect_at(depth + 1))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Hash(pairs) => {
                let parts: Vec<String> = pairs
                    .snapshot()
                    .iter()
                    .map(|(k, v)| format!("{} => {}", k.inspect_at(depth + 1), v.inspect_at(depth + 1)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            other => other.to_string(),
        }
    }

    /// Key equality for hash lookups: same type and equal values, so `1` and
    /// `1.0` are different keys
    pub fn key_eq(&self, other: &Value) -> bool {
        self.key_eq_at(other, 0)
    }

    fn key_eq_at(&self, other: &Value, depth: usize) -> bool {
        self.type_tag() == other.type_tag() && self.eq_at(other, depth)
    }

    /// Structural equality. Containers are compared on snapshots so no lock
    /// is held while descending, and self-referential containers stop at
    /// `MAX_COMPARE_DEPTH`.
    fn eq_at(&self, other: &Value, depth: usize) -> bool {
        match (self.raw(), other.raw()) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                if depth >= MAX_COMPARE_DEPTH {
                    return false;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.eq_at(y, depth + 1))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                if depth >= MAX_COMPARE_DEPTH {
                    return false;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter().any(|(other_key, other_value)| {
                            key.key_eq_at(other_key, depth + 1)
                                && value.eq_at(other_value, depth + 1)
                        })
                    })
            }
            (Value::Object(a), Value::Object(b)) => {
                Arc::ptr_eq(a, b)
                    || matches!((a.constant_name(), b.constant_name()), (Some(x), Some(y)) if x == y)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) | Value::Symbol(s) => write!(f, "{}", s),
            Value::Array(_) | Value::Hash(_) => write!(f, "{}", self.inspect()),
            Value::Object(object) => match object.constant_name() {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "#<{}>", object.class_name()),
            },
            Value::Proxy(_) => write!(f, "#<Object>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_at(other, 0)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

/// Runtime error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Loop iteration counter passed its maximum
    #[error("ERROR: Maximum allowed iterations exceeded ({count})")]
    IterationLimitExceeded { count: u64 },
    /// Invocation counter for one method passed its maximum
    #[error("ERROR: Maximum allowed invocations for '{name}' exceeded ({count})")]
    InvocationLimitExceeded { name: String, count: u64 },
    /// The policy refused a method call on a proxied value
    #[error("undefined method {operation} for {target}")]
    CapabilityDenied { operation: String, target: String },
    /// A proxy for a constant that is not allowed
    #[error("Illegal access to constant {name}")]
    IllegalConstant { name: String },
    /// The value has no such method
    #[error("undefined method '{name}' for {receiver}")]
    NoMethod { name: String, receiver: String },
    /// Wrong number of arguments
    #[error("wrong number of arguments calling '{name}' (given {given}, expected {expected})")]
    ArgumentError {
        name: String,
        given: usize,
        expected: String,
    },
    /// Type error
    #[error("Type error: {msg}")]
    TypeError { msg: String },
    /// Division by zero
    #[error("divided by 0")]
    DivideByZero,
    /// A string or array would grow past its size limit
    #[error("{what} exceeds the maximum size ({limit})")]
    SizeLimitExceeded { what: String, limit: usize },
    /// Error raised by a block or a host object
    #[error("{msg}")]
    Block { msg: String },
}

impl RuntimeError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        RuntimeError::TypeError { msg: msg.into() }
    }

    /// Whether the error comes from a resource guard or the capability
    /// proxy rather than from the script's own logic
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            RuntimeError::IterationLimitExceeded { .. }
                | RuntimeError::InvocationLimitExceeded { .. }
                | RuntimeError::CapabilityDenied { .. }
                | RuntimeError::IllegalConstant { .. }
                | RuntimeError::SizeLimitExceeded { .. }
        )
    }
}
