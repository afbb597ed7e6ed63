//! Procedure registry for the worker side.
//!
//! Maps procedure names to handler functions. Call requests naming an
//! unregistered procedure are answered with an application error; a name
//! never reaches arbitrary code.
//!
//! # Example
//!
//! ```
//! use taskwire::service::ProcedureRegistry;
//! use bytes::Bytes;
//!
//! let mut registry = ProcedureRegistry::new();
//! registry.register("echo", |args, _ctx| async move { Ok(args) });
//! assert!(registry.contains("echo"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use super::context::ProcedureContext;

/// Outcome of one procedure execution: encoded result bytes, or an error
/// message reported back as an application failure.
pub type ProcedureResult = std::result::Result<Bytes, String>;

/// Boxed future returned by procedure handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A registered procedure handler.
pub trait Procedure: Send + Sync + 'static {
    /// Execute with the encoded argument payload.
    fn call(&self, args: Bytes, ctx: ProcedureContext) -> BoxFuture<ProcedureResult>;
}

impl<F, Fut> Procedure for F
where
    F: Fn(Bytes, ProcedureContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    fn call(&self, args: Bytes, ctx: ProcedureContext) -> BoxFuture<ProcedureResult> {
        Box::pin(self(args, ctx))
    }
}

/// Name-keyed table of procedure handlers.
#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Box<dyn Procedure>>,
}

impl ProcedureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous handler.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Bytes, ProcedureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.procedures.insert(name.to_string(), Box::new(handler));
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<&dyn Procedure> {
        self.procedures.get(name).map(|p| p.as_ref())
    }

    /// Check whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProcedureRegistry::new();
        registry.register("echo", |args: Bytes, _ctx| async move { Ok(args) });

        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = ProcedureRegistry::new();
        registry.register("p", |_args, _ctx| async move { Ok(Bytes::from_static(b"a")) });
        registry.register("p", |_args, _ctx| async move { Ok(Bytes::from_static(b"b")) });

        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_executes() {
        let mut registry = ProcedureRegistry::new();
        registry.register("upper", |args: Bytes, _ctx| async move {
            let s = String::from_utf8(args.to_vec()).map_err(|e| e.to_string())?;
            Ok(Bytes::from(s.to_uppercase()))
        });

        let ctx = ProcedureContext::detached(1);
        let out = registry
            .get("upper")
            .unwrap()
            .call(Bytes::from_static(b"abc"), ctx)
            .await
            .unwrap();

        assert_eq!(&out[..], b"ABC");
    }

    #[tokio::test]
    async fn test_handler_error_is_message() {
        let mut registry = ProcedureRegistry::new();
        registry.register("fail", |_args, _ctx| async move {
            Err::<Bytes, _>("it broke".to_string())
        });

        let ctx = ProcedureContext::detached(1);
        let err = registry
            .get("fail")
            .unwrap()
            .call(Bytes::new(), ctx)
            .await
            .unwrap_err();

        assert_eq!(err, "it broke");
    }
}
