//! Warden runtime API for embedding
//!
//! Instrumented scripts call back into the host through the `::Warden`
//! namespace: `::Warden.handle(x)` wraps values in capability proxies and
//! the counter checks enforce the resource limits. A host evaluator routes
//! those calls to a [`Warden`] instance built from the same policy the
//! script was rewritten under.

use crate::audit::{AuditEvent, AuditLogger, NullAuditLogger};
use crate::policy::Policy;
use crate::proxy::Proxy;
use crate::value::{RuntimeError, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Options of `::Warden.handle(value, constant: true)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleOptions {
    /// The value was read from a constant; its name must be allowed
    pub constant: bool,
}

impl HandleOptions {
    pub fn constant() -> Self {
        Self { constant: true }
    }
}

/// Runtime side of the sandbox
///
/// Cheap to clone; every proxy holds one.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use warden_runtime::{Policy, Value, Warden};
///
/// let policy = Policy::builder().deny_invoke_of(["delete"]).build();
/// let warden = Warden::new(Arc::new(policy));
///
/// let items = warden.handle(Value::array(vec![Value::Integer(1)]));
/// assert!(items.invoke("length", &[], None).is_ok());
/// assert!(items.invoke("delete", &[Value::Integer(1)], None).is_err());
/// ```
#[derive(Clone)]
pub struct Warden {
    policy: Arc<Policy>,
    audit: Arc<dyn AuditLogger>,
}

impl Warden {
    /// Create a runtime enforcing `policy`
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            policy,
            audit: Arc::new(NullAuditLogger::new()),
        }
    }

    /// Create a runtime that reports enforcement decisions to `logger`
    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = logger;
        self
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    pub fn audit_logger(&self) -> Arc<dyn AuditLogger> {
        Arc::clone(&self.audit)
    }

    /// Wrap a value for use by the script
    ///
    /// Primitives and existing proxies are returned unchanged, unless a type
    /// rule covers the primitive's type. Everything else is wrapped.
    pub fn handle(&self, value: Value) -> Value {
        if self.passes_through(&value) {
            return value;
        }
        Value::Proxy(Arc::new(Proxy::new(value, self.clone())))
    }

    /// [`Warden::handle`] with options. With `constant` the value must be a
    /// class or module bound to an allowed constant.
    pub fn handle_with(&self, value: Value, options: HandleOptions) -> Result<Value, RuntimeError> {
        if self.passes_through(&value) {
            return Ok(value);
        }
        if options.constant && !value.type_tag().is_primitive() {
            let proxy = Proxy::for_constant(value, self.clone())?;
            return Ok(Value::Proxy(Arc::new(proxy)));
        }
        Ok(self.handle(value))
    }

    fn passes_through(&self, value: &Value) -> bool {
        value.is_proxy() || (value.type_tag().is_primitive() && !self.policy.has_type_rule_for(value))
    }

    /// Called by the iteration snippet: `count` is the loop site's counter
    /// after incrementing
    pub fn check_iteration_counter(&self, count: u64) -> Result<(), RuntimeError> {
        match self.policy.maximum_iterations() {
            Some(limit) if count > limit => {
                warn!(event = "warden.iteration_limit", count, limit);
                self.report(AuditEvent::IterationLimitExceeded { count, limit });
                Err(RuntimeError::IterationLimitExceeded { count })
            }
            _ => Ok(()),
        }
    }

    /// Called by the invocation snippet before each call of a limited method
    pub fn check_invocation_counter(&self, method: &str, count: u64) -> Result<(), RuntimeError> {
        match self.policy.maximum_invocations_of(method) {
            Some(limit) if count > limit => {
                warn!(event = "warden.invocation_limit", method, count, limit);
                self.report(AuditEvent::InvocationLimitExceeded {
                    method: method.to_string(),
                    count,
                    limit,
                });
                Err(RuntimeError::InvocationLimitExceeded {
                    name: method.to_string(),
                    count,
                })
            }
            _ => {
                trace!(event = "warden.invocation", method, count);
                Ok(())
            }
        }
    }

    pub fn instance_response_to(&self, value: &Value, method: &str, argc: usize) -> bool {
        self.policy.instance_response_to(value, method, argc)
    }

    pub fn allowed_constant(&self, name: &str) -> bool {
        self.policy.allowed_constant(name)
    }

    pub(crate) fn report(&self, event: AuditEvent) {
        self.audit.log(event);
    }
}

impl fmt::Debug for Warden {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warden")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
