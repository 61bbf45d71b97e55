//! Capability proxy
//!
//! A [`Proxy`] wraps one live value and checks the policy before every call
//! made through it. Results come back through [`Warden::handle`], so values
//! reached from a proxy are proxied too.
//!
//! A few methods are answered by the proxy itself: `warden_raw` unwraps,
//! `is_a?`, `kind_of?`, `instance_of?` and `class` describe the wrapped
//! value's real type, and `respond_to?` reports the policy decision.
//! Hash proxies unwrap keys and values passed to `[]` and `[]=`.

use crate::audit::AuditEvent;
use crate::runtime::Warden;
use crate::value::{Block, RuntimeError, Value};
use std::fmt;
use tracing::{debug, warn};

/// Method that hands the wrapped value back to trusted code
pub const UNWRAP_METHOD: &str = "warden_raw";

/// Capability proxy around one value
pub struct Proxy {
    target: Value,
    constant: bool,
    warden: Warden,
}

impl Proxy {
    pub(crate) fn new(target: Value, warden: Warden) -> Self {
        debug_assert!(!target.is_proxy());
        Self {
            target,
            constant: false,
            warden,
        }
    }

    /// Proxy for a value read from a constant. Fails unless the constant
    /// the value is bound to is allowed.
    pub(crate) fn for_constant(target: Value, warden: Warden) -> Result<Self, RuntimeError> {
        let name = target
            .constant_name()
            .unwrap_or_else(|| target.to_string());
        if !warden.allowed_constant(&name) {
            warn!(event = "warden.illegal_constant", constant = %name);
            warden.report(AuditEvent::IllegalConstant { name: name.clone() });
            return Err(RuntimeError::IllegalConstant { name });
        }
        Ok(Self {
            target,
            constant: true,
            warden,
        })
    }

    /// The wrapped value
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// Created through `handle(value, constant: true)`
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Hash proxies unwrap `[]`/`[]=` arguments
    pub fn is_container(&self) -> bool {
        matches!(self.target, Value::Hash(_))
    }

    /// Invoke `name` on the wrapped value if the policy permits it
    pub fn invoke(&self, name: &str, args: &[Value], block: Option<&Block>) -> Result<Value, RuntimeError> {
        match (name, args) {
            (UNWRAP_METHOD, []) => return Ok(self.target.clone()),
            ("is_a?" | "kind_of?" | "instance_of?" | "class", _) => {
                let args = unwrap_all(args);
                return self.target.invoke(name, &args, block);
            }
            ("respond_to?", [method, ..]) => {
                let method = match method.raw() {
                    Value::String(s) | Value::Symbol(s) => s.to_string(),
                    other => other.to_string(),
                };
                let responds = self.warden.policy().permits(&self.target, &method)
                    && self.target.method_arity(&method).is_some();
                return Ok(Value::Bool(responds));
            }
            _ => {}
        }

        if !self.warden.instance_response_to(&self.target, name, args.len()) {
            let target = self.target.inspect();
            warn!(event = "warden.capability_denied", operation = name, target = %target);
            self.warden.report(AuditEvent::CapabilityDenied {
                operation: name.to_string(),
                target: target.clone(),
            });
            return Err(RuntimeError::CapabilityDenied {
                operation: name.to_string(),
                target,
            });
        }

        debug!(event = "warden.invoke", operation = name, class = %self.target.class_name());
        let result = if self.is_container() && matches!(name, "[]" | "[]=") {
            self.target.invoke(name, &unwrap_all(args), block)?
        } else {
            self.target.invoke(name, args, block)?
        };
        Ok(self.warden.handle(result))
    }
}

fn unwrap_all(args: &[Value]) -> Vec<Value> {
    args.iter().map(Value::unwrapped).collect()
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("target", &self.target)
            .field("constant", &self.constant)
            .finish()
    }
}
