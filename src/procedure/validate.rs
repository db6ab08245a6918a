//! Input and output validators

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;

/// Checks a JSON value and returns the value to continue with
pub trait Validator: Send + Sync {
    /// # Errors
    ///
    /// Returns a human-readable reason when the value is rejected
    fn validate(&self, value: Value) -> Result<Value, String>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync,
{
    fn validate(&self, value: Value) -> Result<Value, String> {
        self(value)
    }
}

/// Validator that requires the value to deserialize into `T`
///
/// The validated value is `T` serialized back, so unknown fields are dropped
/// and serde defaults are filled in.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Validator for Typed<T>
where
    T: DeserializeOwned + Serialize,
{
    fn validate(&self, value: Value) -> Result<Value, String> {
        let parsed: T = serde_json::from_value(value).map_err(|e| e.to_string())?;
        serde_json::to_value(parsed).map_err(|e| e.to_string())
    }
}

#[must_use]
pub const fn typed<T>() -> Typed<T>
where
    T: DeserializeOwned + Serialize,
{
    Typed(PhantomData)
}

/// Validator that accepts anything unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Any;

impl Validator for Any {
    fn validate(&self, value: Value) -> Result<Value, String> {
        Ok(value)
    }
}

#[must_use]
pub const fn any() -> Any {
    Any
}

/// Deserialize a validated input into a concrete type
///
/// # Errors
///
/// Returns `INPUT_VALIDATION_ERROR` if the value does not fit `T`
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::input_validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Rename {
        name: String,
        #[serde(default)]
        notify: bool,
    }

    #[test]
    fn typed_normalizes_value() {
        let out = typed::<Rename>()
            .validate(json!({"name": "owls", "extra": 1}))
            .unwrap();
        assert_eq!(out, json!({"name": "owls", "notify": false}));
    }

    #[test]
    fn typed_rejects_wrong_shape() {
        let err = typed::<Rename>().validate(json!({"name": 7})).unwrap_err();
        assert!(err.contains("invalid type"));
    }

    #[test]
    fn closures_are_validators() {
        let positive = |v: Value| match v.as_i64() {
            Some(n) if n > 0 => Ok(v),
            _ => Err("must be positive".to_string()),
        };
        assert!(positive.validate(json!(3)).is_ok());
        assert_eq!(positive.validate(json!(-1)).unwrap_err(), "must be positive");
    }

    #[test]
    fn decode_maps_to_input_validation() {
        let err = decode::<u32>(json!("seven")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InputValidationError);
    }
}
