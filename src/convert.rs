//! Value conversion between the wire format and interpreter objects

use rustpython_vm::builtins::{PyDict, PyFloat, PyInt, PyList, PyStr, PyTuple};
use rustpython_vm::convert::TryFromObject;
use rustpython_vm::{AsObject, PyObjectRef, PyResult, VirtualMachine};
use serde_json::{Map, Number, Value};

/// Nesting bound for returned values; cyclic containers exhaust it instead
/// of recursing forever
const MAX_VALUE_DEPTH: usize = 128;

/// A return value the wire format cannot carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnserializableValue {
    /// Python type name of the offending value
    pub type_name: String,
}

/// Build the interpreter object for a wire value
pub fn json_to_py(vm: &VirtualMachine, value: &Value) -> PyResult {
    match value {
        Value::Null => Ok(vm.ctx.none()),
        Value::Bool(value) => Ok(vm.ctx.new_bool(*value).into()),
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Ok(vm.ctx.new_int(value).into())
            } else if let Some(value) = number.as_u64() {
                Ok(vm.ctx.new_int(value).into())
            } else {
                Ok(vm.ctx.new_float(number.as_f64().unwrap_or_default()).into())
            }
        }
        Value::String(value) => Ok(vm.ctx.new_str(value.as_str()).into()),
        Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(json_to_py(vm, item)?);
            }
            Ok(vm.ctx.new_list(elements).into())
        }
        Value::Object(fields) => {
            let dict = vm.ctx.new_dict();
            for (key, item) in fields {
                dict.set_item(key.as_str(), json_to_py(vm, item)?, vm)?;
            }
            Ok(dict.into())
        }
    }
}

/// Encode an interpreter object as a wire value.
///
/// Accepts `None`, booleans, machine-width integers, finite floats, strings,
/// lists, tuples, and dicts with string keys. Everything else is refused.
pub fn py_to_json(vm: &VirtualMachine, value: &PyObjectRef) -> Result<Value, UnserializableValue> {
    py_to_json_at(vm, value, 0)
}

fn py_to_json_at(
    vm: &VirtualMachine,
    value: &PyObjectRef,
    depth: usize,
) -> Result<Value, UnserializableValue> {
    if depth > MAX_VALUE_DEPTH {
        return Err(UnserializableValue {
            type_name: "<nesting too deep>".to_string(),
        });
    }

    if vm.is_none(value) {
        return Ok(Value::Null);
    }

    if value.payload::<PyInt>().is_some() {
        // bool is an int subtype and must be checked first
        if value.class().is(vm.ctx.types.bool_type) {
            return match i64::try_from_object(vm, value.clone()) {
                Ok(raw) => Ok(Value::Bool(raw != 0)),
                Err(_) => Err(unserializable(vm, value)),
            };
        }
        if let Ok(signed) = i64::try_from_object(vm, value.clone()) {
            return Ok(Value::Number(signed.into()));
        }
        if let Ok(unsigned) = u64::try_from_object(vm, value.clone()) {
            return Ok(Value::Number(unsigned.into()));
        }
        return Err(unserializable(vm, value));
    }

    if let Some(float) = value.payload::<PyFloat>() {
        // NaN and the infinities have no wire representation
        return Number::from_f64(float.to_f64())
            .map(Value::Number)
            .ok_or_else(|| unserializable(vm, value));
    }

    if let Some(string) = value.payload::<PyStr>() {
        return Ok(Value::String(string.as_str().to_owned()));
    }

    if let Some(list) = value.payload::<PyList>() {
        let elements = list.borrow_vec().to_vec();
        let mut items = Vec::with_capacity(elements.len());
        for element in &elements {
            items.push(py_to_json_at(vm, element, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    if let Some(tuple) = value.payload::<PyTuple>() {
        let elements = tuple.as_slice();
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            items.push(py_to_json_at(vm, element, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    if let Some(dict) = value.payload::<PyDict>() {
        let mut fields = Map::new();
        for (key, item) in dict {
            let Some(key) = key.payload::<PyStr>() else {
                return Err(unserializable(vm, value));
            };
            fields.insert(key.as_str().to_owned(), py_to_json_at(vm, &item, depth + 1)?);
        }
        return Ok(Value::Object(fields));
    }

    Err(unserializable(vm, value))
}

fn unserializable(vm: &VirtualMachine, value: &PyObjectRef) -> UnserializableValue {
    let type_name = value
        .class()
        .as_object()
        .get_attr("__name__", vm)
        .ok()
        .and_then(|name| name.payload::<PyStr>().map(|name| name.as_str().to_owned()))
        .unwrap_or_else(|| "object".to_owned());
    UnserializableValue { type_name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_vm::Interpreter;
    use serde_json::json;

    fn with_vm<R>(f: impl FnOnce(&VirtualMachine) -> R) -> R {
        Interpreter::without_stdlib(Default::default()).enter(f)
    }

    fn roundtrip(value: Value) -> Value {
        with_vm(|vm| {
            let object = json_to_py(vm, &value).expect("wire value converts in");
            py_to_json(vm, &object).expect("converted value comes back out")
        })
    }

    #[test]
    fn test_scalars_roundtrip() {
        for value in [
            json!(null),
            json!(true),
            json!(false),
            json!(0),
            json!(-7),
            json!(u64::MAX),
            json!(2.5),
            json!(""),
            json!("hello"),
        ] {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn test_containers_roundtrip() {
        let value = json!({"items": [1, [2.5, "x"], {"nested": null}], "ok": true});
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn test_tuple_encodes_as_array() {
        with_vm(|vm| {
            let tuple = vm
                .ctx
                .new_tuple(vec![vm.ctx.new_int(1).into(), vm.ctx.new_str("a").into()]);
            let encoded = py_to_json(vm, &tuple.into()).expect("tuple encodes");
            assert_eq!(encoded, json!([1, "a"]));
        });
    }

    #[test]
    fn test_non_finite_float_is_refused() {
        with_vm(|vm| {
            let nan: PyObjectRef = vm.ctx.new_float(f64::NAN).into();
            let refused = py_to_json(vm, &nan).expect_err("NaN has no wire form");
            assert_eq!(refused.type_name, "float");
        });
    }

    #[test]
    fn test_non_string_dict_key_is_refused() {
        with_vm(|vm| {
            let dict = vm.ctx.new_dict();
            let key: PyObjectRef = vm.ctx.new_int(1).into();
            dict.set_item(&*key, vm.ctx.new_str("v").into(), vm)
                .expect("dict accepts the entry");
            let refused = py_to_json(vm, &dict.into()).expect_err("int key has no wire form");
            assert_eq!(refused.type_name, "dict");
        });
    }

    #[test]
    fn test_cyclic_list_exhausts_the_depth_bound() {
        with_vm(|vm| {
            let list = vm.ctx.new_list(Vec::new());
            list.borrow_vec_mut().push(list.clone().into());
            let refused = py_to_json(vm, &list.into()).expect_err("cycle has no wire form");
            assert_eq!(refused.type_name, "<nesting too deep>");
        });
    }

    #[test]
    fn test_arbitrary_object_is_refused() {
        with_vm(|vm| {
            let object = vm
                .builtins
                .as_object()
                .get_attr("object", vm)
                .expect("builtins has object")
                .call((), vm)
                .expect("object() constructs");
            let refused = py_to_json(vm, &object).expect_err("plain object has no wire form");
            assert_eq!(refused.type_name, "object");
        });
    }
}
