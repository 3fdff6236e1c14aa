// src/script/convert.rs
use super::{Callable, CallableId, ScriptValue};
use crate::error::{Error, Result};
use crate::ingest::pipeline::Transforms;
use crate::registry::BuiltinArgs;
use rhai::{Dynamic, FnPtr, Map, AST};
use serde_json::Value;

pub(crate) const FILTERS_KEY: &str = "filters";
pub(crate) const PRIORITIES_KEY: &str = "priorities";
pub(crate) const STATUS_KEY: &str = "status";

/// A function value taken from a builtin call.
pub(crate) struct Captured {
    pub(crate) fn_ptr: FnPtr,
    builtin: String,
    label: String,
}

/// Split a builtin's option map into query parameters and transform callables.
///
/// Function values are moved into `table`; the returned `Callable`s index it.
pub(crate) fn builtin_args(
    builtin: &str,
    mut options: Map,
    table: &mut Vec<Captured>,
) -> Result<BuiltinArgs> {
    let filters = take_callable_list(builtin, &mut options, FILTERS_KEY, table)?;
    let priorities = take_callable_list(builtin, &mut options, PRIORITIES_KEY, table)?;
    let status = match options.remove(STATUS_KEY) {
        None => None,
        Some(v) if v.is_unit() => None,
        Some(v) => Some(capture(builtin, STATUS_KEY, v, table)?),
    };

    let params = rhai::serde::from_dynamic::<Value>(&Dynamic::from_map(options))
        .map_err(|e| Error::invalid_arguments(builtin, e.to_string()))?;
    let params = match params {
        Value::Object(map) => map,
        other => {
            return Err(Error::invalid_arguments(
                builtin,
                format!("expected an object map, got {other}"),
            ))
        }
    };

    Ok(BuiltinArgs::new(
        builtin,
        params,
        Transforms {
            filters,
            priorities,
            status,
        },
    ))
}

fn take_callable_list(
    builtin: &str,
    options: &mut Map,
    key: &str,
    table: &mut Vec<Captured>,
) -> Result<Vec<Callable>> {
    let value = match options.remove(key) {
        None => return Ok(Vec::new()),
        Some(v) if v.is_unit() => return Ok(Vec::new()),
        Some(v) => v,
    };
    let items = value.into_array().map_err(|actual| {
        Error::invalid_arguments(
            builtin,
            format!("`{key}` must be an array of functions, got {actual}"),
        )
    })?;
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| capture(builtin, &format!("{key}[{i}]"), item, table))
        .collect()
}

fn capture(
    builtin: &str,
    what: &str,
    value: Dynamic,
    table: &mut Vec<Captured>,
) -> Result<Callable> {
    let type_name = value.type_name();
    let fn_ptr = value.try_cast::<FnPtr>().ok_or_else(|| {
        Error::invalid_arguments(builtin, format!("`{what}` must be a function, got {type_name}"))
    })?;
    // closures only have a generated name
    let name = if fn_ptr.is_anonymous() {
        what
    } else {
        fn_ptr.fn_name()
    };
    let callable = Callable::new(CallableId(table.len()), name);
    table.push(Captured {
        fn_ptr,
        builtin: builtin.to_string(),
        label: what.to_string(),
    });
    Ok(callable)
}

/// Every captured function must be defined by the script and take exactly one
/// argument (the entry) after its curried ones.
pub(crate) fn check_signatures(ast: &AST, table: &[Captured]) -> Result<()> {
    for captured in table {
        let name = captured.fn_ptr.fn_name();
        let curried = captured.fn_ptr.curry().len();
        let arities: Vec<usize> = ast
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| f.params.len())
            .collect();
        if arities.contains(&(curried + 1)) {
            continue;
        }
        let label = &captured.label;
        let reason = match arities.first() {
            None => format!("`{label}` refers to {name:?}, which the script does not define"),
            Some(n) => format!(
                "`{label}` must take one parameter (the entry), it takes {}",
                n.saturating_sub(curried)
            ),
        };
        return Err(Error::invalid_arguments(&captured.builtin, reason));
    }
    Ok(())
}

pub(crate) fn script_value(value: Dynamic) -> ScriptValue {
    if value.is_unit() {
        return ScriptValue::Unit;
    }
    if let Ok(b) = value.as_bool() {
        return ScriptValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return ScriptValue::Int(i);
    }
    if let Ok(x) = value.as_float() {
        return ScriptValue::Float(x);
    }
    let type_name = value.type_name();
    match value.into_string() {
        Ok(s) => ScriptValue::Str(s),
        Err(_) => ScriptValue::Other(type_name.to_string()),
    }
}
