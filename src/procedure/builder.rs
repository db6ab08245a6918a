//! Persistent procedure builder

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::validate::{self, Validator};
use super::{Procedure, Resolver};
use crate::error::RpcError;
use crate::protocol::CallType;
use crate::session::Session;

/// Builder for a [`Procedure`]
///
/// Every method takes `&self` and returns a new builder, so a partially
/// configured builder can be shared as a base for several procedures.
///
/// ```ignore
/// let authed = procedure().meta(json!({"auth": true}));
/// let rename = authed
///     .input(validate::typed::<Rename>())
///     .mutation(|input: Rename, _session| async move { Ok(input.name) });
/// ```
#[derive(Clone, Default)]
pub struct ProcedureBuilder {
    inputs: Vec<Arc<dyn Validator>>,
    output: Option<Arc<dyn Validator>>,
    meta: Map<String, Value>,
}

/// Start a new procedure
#[must_use]
pub fn procedure() -> ProcedureBuilder {
    ProcedureBuilder::default()
}

impl ProcedureBuilder {
    /// Append an input validator
    #[must_use]
    pub fn input(&self, validator: impl Validator + 'static) -> Self {
        let mut next = self.clone();
        next.inputs.push(Arc::new(validator));
        next
    }

    /// Set the output validator
    #[must_use]
    pub fn output(&self, validator: impl Validator + 'static) -> Self {
        let mut next = self.clone();
        next.output = Some(Arc::new(validator));
        next
    }

    /// Merge metadata fields
    ///
    /// Non-object values are ignored.
    #[must_use]
    pub fn meta(&self, meta: Value) -> Self {
        let mut next = self.clone();
        match meta {
            Value::Object(fields) => next.meta.extend(fields),
            other => tracing::warn!(meta = %other, "ignoring non-object procedure metadata"),
        }
        next
    }

    /// Freeze into a query
    pub fn query<I, T, F, Fut>(&self, resolver: F) -> Procedure
    where
        I: DeserializeOwned + Send + 'static,
        T: Serialize + 'static,
        F: Fn(I, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RpcError>> + Send + 'static,
    {
        self.build(CallType::Query, erase(resolver))
    }

    /// Freeze into a mutation
    pub fn mutation<I, T, F, Fut>(&self, resolver: F) -> Procedure
    where
        I: DeserializeOwned + Send + 'static,
        T: Serialize + 'static,
        F: Fn(I, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RpcError>> + Send + 'static,
    {
        self.build(CallType::Mutation, erase(resolver))
    }

    fn build(&self, call_type: CallType, resolver: Resolver) -> Procedure {
        Procedure {
            call_type,
            inputs: self.inputs.clone(),
            output: self.output.clone(),
            meta: self.meta.clone(),
            resolver,
        }
    }
}

fn erase<I, T, F, Fut>(resolver: F) -> Resolver
where
    I: DeserializeOwned + Send + 'static,
    T: Serialize + 'static,
    F: Fn(I, Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RpcError>> + Send + 'static,
{
    let resolver = Arc::new(resolver);
    Arc::new(move |input: Value, session: Session| -> BoxFuture<'static, Result<Value, RpcError>> {
        let resolver = Arc::clone(&resolver);
        Box::pin(async move {
            let input: I = validate::decode(input)?;
            let output = resolver(input, session).await?;
            serde_json::to_value(output)
                .map_err(|e| RpcError::internal(format!("failed to serialize output: {e}")))
        })
    })
}
