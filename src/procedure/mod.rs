//! Procedures: validated, invocable units of work
//!
//! A [`Procedure`] is frozen out of a [`ProcedureBuilder`]. Invoking it runs
//! every input validator against the raw input, awaits the resolver with the
//! validated value and the caller's [`Session`], then checks the result with
//! the output validator if one was declared.

mod builder;
pub mod validate;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

pub use builder::{ProcedureBuilder, procedure};
pub use validate::Validator;

use crate::error::RpcError;
use crate::protocol::CallType;
use crate::session::Session;

/// Type-erased resolver
pub type Resolver =
    Arc<dyn Fn(Value, Session) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// A callable operation registered in a router
pub struct Procedure {
    call_type: CallType,
    inputs: Vec<Arc<dyn Validator>>,
    output: Option<Arc<dyn Validator>>,
    meta: Map<String, Value>,
    resolver: Resolver,
}

impl Procedure {
    #[must_use]
    pub const fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Free-form metadata attached at build time
    #[must_use]
    pub const fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Run the input validators
    ///
    /// Every validator sees the raw input. Object outputs are merged with the
    /// later validator winning on shared keys; any other output replaces what
    /// came before.
    ///
    /// # Errors
    ///
    /// Returns `INPUT_VALIDATION_ERROR` from the first validator that rejects
    pub fn parse_input(&self, input: Value) -> Result<Value, RpcError> {
        let mut parsed: Option<Value> = None;

        for validator in &self.inputs {
            let output = validator
                .validate(input.clone())
                .map_err(RpcError::input_validation)?;

            parsed = Some(match (parsed, output) {
                (Some(Value::Object(mut merged)), Value::Object(fields)) => {
                    merged.extend(fields);
                    Value::Object(merged)
                }
                (_, output) => output,
            });
        }

        Ok(parsed.unwrap_or(input))
    }

    /// Validate, resolve and check the output
    ///
    /// # Errors
    ///
    /// Returns `INPUT_VALIDATION_ERROR`, the resolver's error, or
    /// `OUTPUT_VALIDATION_ERROR`
    pub async fn call(&self, input: Value, session: Session) -> Result<Value, RpcError> {
        let input = self.parse_input(input)?;
        let output = (self.resolver)(input, session).await?;

        match &self.output {
            Some(validator) => validator
                .validate(output)
                .map_err(RpcError::output_validation),
            None => Ok(output),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("call_type", &self.call_type)
            .field("inputs", &self.inputs.len())
            .field("output", &self.output.is_some())
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
