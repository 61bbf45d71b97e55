//! Runtime guards driven the way instrumented scripts drive them

use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use warden_runtime::method_dispatch::Arity;
use warden_runtime::value::Block;
use warden_runtime::{
    validate, AuditEvent, HandleOptions, HostObject, MemoryAuditLogger, Policy, RuntimeError,
    Value, Warden,
};

#[derive(Debug, Default)]
struct Store {
    deleted: Mutex<Vec<String>>,
}

impl HostObject for Store {
    fn class_name(&self) -> &str {
        "Store"
    }

    fn method_arity(&self, name: &str) -> Option<Arity> {
        match name {
            "delete" | "fetch" => Some(Arity::Exact(1)),
            _ => None,
        }
    }

    fn call(&self, name: &str, args: &[Value], _block: Option<&Block>) -> Result<Value, RuntimeError> {
        match name {
            "delete" => {
                let key = args[0].to_string();
                self.deleted.lock().unwrap().push(key);
                Ok(Value::Nil)
            }
            "fetch" => Ok(Value::string(format!("value of {}", args[0]))),
            _ => Err(RuntimeError::NoMethod {
                name: name.to_string(),
                receiver: "Store".to_string(),
            }),
        }
    }
}

fn warden(policy: Policy) -> (Warden, Arc<MemoryAuditLogger>) {
    let audit = Arc::new(MemoryAuditLogger::new());
    let warden = Warden::new(Arc::new(policy)).with_audit_logger(audit.clone());
    (warden, audit)
}

/// Runs a loop body the way `_it_c_1 += 1; check_iteration_counter(_it_c_1)`
/// does, returning how many bodies ran
fn run_loop(warden: &Warden, iterations: u64) -> (u64, Result<(), RuntimeError>) {
    let mut counter = 0;
    let mut bodies = 0;
    for _ in 0..iterations {
        counter += 1;
        if let Err(err) = warden.check_iteration_counter(counter) {
            return (bodies, Err(err));
        }
        bodies += 1;
    }
    (bodies, Ok(()))
}

#[test]
fn test_iteration_limit_stops_the_fourth_pass() {
    let (warden, audit) = warden(Policy::builder().maximum_iterations(3).build());
    let (bodies, result) = run_loop(&warden, 10);
    assert_eq!(bodies, 3);
    assert_eq!(result, Err(RuntimeError::IterationLimitExceeded { count: 4 }));
    assert_eq!(
        audit.events(),
        vec![AuditEvent::IterationLimitExceeded { count: 4, limit: 3 }]
    );
}

#[test]
fn test_short_loop_stays_within_limit() {
    let (warden, audit) = warden(Policy::builder().maximum_iterations(3).build());
    assert_eq!(run_loop(&warden, 3), (3, Ok(())));
    assert!(audit.events().is_empty());
}

#[test]
fn test_invocation_limit_stops_the_third_call() {
    let (warden, _) = warden(Policy::builder().maximum_invocations_of("notify", 2).build());
    assert!(warden.check_invocation_counter("notify", 1).is_ok());
    assert!(warden.check_invocation_counter("notify", 2).is_ok());
    assert_eq!(
        warden.check_invocation_counter("notify", 3),
        Err(RuntimeError::InvocationLimitExceeded {
            name: "notify".to_string(),
            count: 3,
        })
    );
    // other methods are unlimited
    assert!(warden.check_invocation_counter("save", 1000).is_ok());
}

#[test]
fn test_globally_denied_method_is_refused_everywhere() {
    let policy = Policy::builder().deny_invoke_of(["delete"]).build();
    assert_eq!(
        validate("store.delete(\"a\")", &policy),
        vec!["invoking method 'delete' is not allowed"]
    );

    let (warden, audit) = warden(policy);
    let store = Arc::new(Store::default());
    let wrapped = warden.handle(Value::Object(store.clone()));
    assert!(wrapped.is_proxy());

    let err = wrapped
        .invoke("delete", &[Value::string("a")], None)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::CapabilityDenied { ref operation, .. } if operation == "delete"));
    assert!(store.deleted.lock().unwrap().is_empty());

    let hash = warden.handle(Value::hash(vec![(Value::symbol("a"), Value::Integer(1))]));
    assert!(matches!(
        hash.invoke("delete", &[Value::symbol("a")], None),
        Err(RuntimeError::CapabilityDenied { .. })
    ));
    assert_eq!(audit.events().len(), 2);
}

#[test]
fn test_allowed_call_reaches_host_and_result_is_wrapped() {
    let (warden, _) = warden(Policy::builder().deny_invoke_of(["delete"]).build());
    let store = warden.handle(Value::object(Store::default()));
    let value = store.invoke("fetch", &[Value::symbol("k")], None).unwrap();
    assert_eq!(value.raw(), &Value::string("value of k"));
}

#[rstest]
#[case("length", Ok(Value::Integer(5)))]
#[case("upcase", Ok(Value::string("HELLO")))]
#[case("reverse", Err(()))]
#[case("downcase", Err(()))]
fn test_string_type_rule(#[case] method: &str, #[case] expected: Result<Value, ()>) {
    let policy = Policy::builder().allow_for("String", ["length", "upcase"]).build();
    let (warden, _) = warden(policy);
    let text = warden.handle(Value::string("hello"));
    assert!(text.is_proxy());

    match (text.invoke(method, &[], None), expected) {
        (Ok(value), Ok(expected)) => assert_eq!(value.raw(), &expected),
        (Err(RuntimeError::CapabilityDenied { operation, target }), Err(())) => {
            assert_eq!(operation, method);
            assert_eq!(target, "\"hello\"");
        }
        (other, expected) => panic!("{} gave {:?}, expected {:?}", method, other, expected),
    }
}

#[test]
fn test_untyped_primitives_pass_through() {
    let (warden, _) = warden(Policy::builder().allow_for("String", ["length"]).build());
    assert!(!warden.handle(Value::Integer(1)).is_proxy());
    assert!(warden.handle(Value::string("x")).is_proxy());
}

#[test]
fn test_constant_access_is_checked() {
    let (warden, audit) = warden(Policy::builder().allowed_constants(["Math"]).build());
    let math = warden
        .handle_with(Value::class_ref("Math"), HandleOptions::constant())
        .unwrap();
    assert!(math.is_proxy());

    assert_eq!(
        warden
            .handle_with(Value::class_ref("File"), HandleOptions::constant())
            .unwrap_err(),
        RuntimeError::IllegalConstant {
            name: "File".to_string()
        }
    );
    assert_eq!(
        audit.events(),
        vec![AuditEvent::IllegalConstant {
            name: "File".to_string()
        }]
    );
}

#[test]
fn test_proxy_answers_for_real_type() {
    let (warden, _) = warden(Policy::permissive());
    let list = warden.handle(Value::array(vec![Value::Integer(1)]));
    assert_eq!(
        list.invoke("is_a?", &[Value::class_ref("Array")], None).unwrap().raw(),
        &Value::Bool(true)
    );
    assert_eq!(list.invoke("warden_raw", &[], None).unwrap().is_proxy(), false);
}

#[test]
fn test_oversized_writes_are_errors() {
    let (warden, _) = warden(Policy::builder().allow_for("String", ["*"]).build());
    let list = warden.handle(Value::array(vec![]));
    assert!(list.is_proxy());
    assert!(matches!(
        list.invoke("[]=", &[Value::Integer(i64::MAX), Value::Integer(1)], None),
        Err(RuntimeError::SizeLimitExceeded { .. })
    ));

    let text = warden.handle(Value::string("ab"));
    assert!(matches!(
        text.invoke("*", &[Value::Integer(i64::MAX)], None),
        Err(RuntimeError::SizeLimitExceeded { .. })
    ));
}

#[test]
fn test_self_containing_array_delete_returns() {
    let (warden, _) = warden(Policy::permissive());
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let list = warden.handle(Value::array(vec![Value::Integer(1)]));
        let raw = list.raw().clone();
        list.invoke("<<", &[raw], None).unwrap();
        let deleted = list.invoke("delete", &[Value::array(vec![Value::Integer(2)])], None);
        tx.send(deleted.map(|value| value.raw().clone())).unwrap();
    });

    let deleted = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("delete on a self-containing array did not return");
    assert_eq!(deleted, Ok(Value::Nil));
}
