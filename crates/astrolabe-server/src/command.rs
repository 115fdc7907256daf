//! Request envelope parsing and typed argument extraction.
//!
//! Every inbound message is a JSON object carrying a `function` key; the
//! remaining keys are the command's named arguments. Empty-string values
//! mean "argument omitted" on the wire and are dropped before extraction,
//! so handlers only ever see present, typed values or their defaults.

use serde_json::{Map, Value};

use crate::error::RpcError;

/// A parsed request envelope.
#[derive(Debug)]
pub struct Envelope {
    pub function: String,
    pub args: Map<String, Value>,
}

/// Parse a message into function name and argument map.
pub fn parse_envelope(text: &str) -> Result<Envelope, RpcError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| RpcError::Protocol(format!("not a JSON object: {err}")))?;
    let Value::Object(mut map) = value else {
        return Err(RpcError::Protocol("expected a JSON object".into()));
    };

    let function = match map.remove("function") {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(RpcError::Protocol(format!(
                "'function' must be a string, got {other}"
            )))
        }
        None => return Err(RpcError::Protocol("missing 'function' key".into())),
    };

    map.retain(|_, v| !matches!(v, Value::String(s) if s.is_empty()));

    Ok(Envelope {
        function,
        args: map,
    })
}

pub fn opt_f64(args: &Map<String, Value>, name: &str) -> Result<Option<f64>, RpcError> {
    match args.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| RpcError::validation(name, v)),
    }
}

pub fn opt_i64(args: &Map<String, Value>, name: &str) -> Result<Option<i64>, RpcError> {
    match args.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| RpcError::validation(name, v)),
    }
}

pub fn opt_u32(args: &Map<String, Value>, name: &str) -> Result<Option<u32>, RpcError> {
    match opt_i64(args, name)? {
        None => Ok(None),
        Some(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| RpcError::validation(name, v)),
    }
}

pub fn opt_bool(args: &Map<String, Value>, name: &str) -> Result<Option<bool>, RpcError> {
    match args.get(name) {
        None => Ok(None),
        // Clients serialize booleans both natively and as 0/1.
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) if n.as_i64() == Some(0) => Ok(Some(false)),
        Some(Value::Number(n)) if n.as_i64() == Some(1) => Ok(Some(true)),
        Some(v) => Err(RpcError::validation(name, v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(json: &str) -> Map<String, Value> {
        parse_envelope(json).unwrap().args
    }

    #[test]
    fn parses_function_and_args() {
        let env = parse_envelope(r#"{"function":"raw","quality":0.5}"#).unwrap();
        assert_eq!(env.function, "raw");
        assert_eq!(env.args.len(), 1);
    }

    #[test]
    fn missing_function_is_a_protocol_error() {
        let err = parse_envelope(r#"{"quality":0.5}"#).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let err = parse_envelope("not json").unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn non_object_is_a_protocol_error() {
        let err = parse_envelope("[1,2,3]").unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn empty_string_arguments_are_dropped() {
        let a = args(r#"{"function":"x","quality":"","keep":1}"#);
        assert!(!a.contains_key("quality"));
        assert!(a.contains_key("keep"));
    }

    #[test]
    fn wrong_types_name_the_parameter() {
        let a = args(r#"{"function":"x","quality":"fast"}"#);
        let err = opt_f64(&a, "quality").unwrap_err();
        match err {
            RpcError::Validation { name, value } => {
                assert_eq!(name, "quality");
                assert!(value.contains("fast"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn numeric_booleans_are_accepted() {
        let a = args(r#"{"function":"x","record":1,"flag":true}"#);
        assert_eq!(opt_bool(&a, "record").unwrap(), Some(true));
        assert_eq!(opt_bool(&a, "flag").unwrap(), Some(true));
        assert_eq!(opt_bool(&a, "missing").unwrap(), None);
    }

    #[test]
    fn negative_value_for_unsigned_parameter_fails() {
        let a = args(r#"{"function":"x","downscale_factor":-2}"#);
        assert!(matches!(
            opt_u32(&a, "downscale_factor"),
            Err(RpcError::Validation { .. })
        ));
    }
}
