//! The restricted global namespace candidate code runs against.

use std::collections::HashMap;

use crate::lang::value::{Builtin, NativeModule, Value};

/// Name under which the math module is exposed.
pub const MATH_MODULE: &str = "math";

/// Build a fresh namespace: the fixed builtin whitelist plus `math`.
///
/// Nothing else is reachable. The map is rebuilt for every invocation so
/// no state leaks between candidates.
pub fn build_namespace() -> HashMap<String, Value> {
    let mut ns: HashMap<String, Value> = Builtin::GLOBALS
        .iter()
        .map(|b| (b.name().to_string(), Value::Builtin(*b)))
        .collect();
    ns.insert(MATH_MODULE.to_string(), Value::Module(NativeModule::Math));
    ns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_is_exactly_the_whitelist() {
        let ns = build_namespace();
        let mut names: Vec<&str> = ns.keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "abs",
                "bool",
                "enumerate",
                "filter",
                "float",
                "int",
                "len",
                "map",
                "math",
                "max",
                "min",
                "range",
                "round",
                "sum",
                "zip",
            ]
        );
    }

    #[test]
    fn test_no_io_or_reflection_names() {
        let ns = build_namespace();
        for name in ["open", "print", "eval", "exec", "__import__", "getattr", "type"] {
            assert!(!ns.contains_key(name), "{name} must not be exposed");
        }
    }

    #[test]
    fn test_math_is_a_module_handle() {
        let ns = build_namespace();
        assert!(matches!(
            ns.get("math"),
            Some(Value::Module(NativeModule::Math))
        ));
    }
}
