//! Capability invocation surface.
//!
//! The gateway executes procedures through the [`CapabilityInvoker`] trait.
//! A procedure either yields a single result document or a stream of
//! progress frames followed by a final result. The transport decides the
//! response mode (single JSON document vs. event stream) from which shape
//! the invoker returns.
//!
//! # Error Classification
//!
//! Invocation failures are classified into two variants:
//! - `Invocation` - the procedure ran and reported a failure (code passthrough)
//! - `Unavailable` - the procedure could not be reached at all (-32005)
//!
//! # Thread Safety
//!
//! Invokers are shared across sessions behind `Arc<dyn CapabilityInvoker>`
//! and must be `Send + Sync`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::GateError;

/// Buffer capacity for progress frame channels. A slow consumer applies
/// backpressure to the producing procedure rather than buffering unboundedly.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// One frame emitted by a streaming procedure.
#[derive(Debug, Clone)]
pub enum CapabilityFrame {
    /// Intermediate server-initiated notification (e.g., progress updates).
    /// Delivered to the client as a JSON-RPC notification.
    Progress {
        /// Notification method name
        method: String,
        /// Notification parameters
        params: Option<Value>,
    },
    /// Terminal frame carrying the procedure's result. After this frame the
    /// stream is complete; any frames sent after it are dropped.
    Done(Value),
}

/// Outcome of a successful invocation.
pub enum CapabilityOutcome {
    /// The procedure produced a single result document.
    Single(Value),
    /// The procedure streams progress frames, ending with `Done`.
    Stream(mpsc::Receiver<CapabilityFrame>),
}

impl std::fmt::Debug for CapabilityOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityOutcome::Single(_) => f.write_str("CapabilityOutcome::Single(..)"),
            CapabilityOutcome::Stream(_) => f.write_str("CapabilityOutcome::Stream(..)"),
        }
    }
}

/// Invocation failure.
#[derive(Debug, Clone)]
pub enum CapabilityError {
    /// The procedure executed and reported failure. The code and message
    /// flow through to the client's JSON-RPC error object unchanged.
    Invocation {
        procedure: String,
        code: i32,
        message: String,
        data: Option<Value>,
    },
    /// The procedure could not be executed (unknown name, backing resource
    /// down). Maps to -32005.
    Unavailable { procedure: String, reason: String },
}

impl From<CapabilityError> for GateError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Invocation {
                procedure,
                code,
                message,
                ..
            } => GateError::CapabilityFailed {
                procedure,
                code,
                message,
            },
            CapabilityError::Unavailable { procedure, reason } => {
                GateError::CapabilityUnavailable { procedure, reason }
            }
        }
    }
}

/// Trait for procedure execution (enables mocking in tests).
///
/// The transport layer only knows this trait; concrete invokers decide what
/// procedures exist and how they run.
#[async_trait::async_trait]
pub trait CapabilityInvoker: Send + Sync {
    /// Invoke a procedure by name with optional arguments.
    async fn invoke(
        &self,
        procedure: &str,
        arguments: Option<Arc<Value>>,
    ) -> Result<CapabilityOutcome, CapabilityError>;
}

/// Boxed future returned by registered procedure handlers.
type ProcedureFuture =
    Pin<Box<dyn Future<Output = Result<CapabilityOutcome, CapabilityError>> + Send>>;

/// Boxed procedure handler.
type ProcedureHandler = Arc<dyn Fn(Option<Arc<Value>>) -> ProcedureFuture + Send + Sync>;

/// Name-indexed procedure table.
///
/// The default invoker for the binary and for tests. Procedures are
/// registered at startup; lookup at invoke time is a single HashMap probe.
#[derive(Default)]
pub struct ProcedureMap {
    handlers: HashMap<String, ProcedureHandler>,
}

impl ProcedureMap {
    /// Create an empty procedure table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table pre-populated with the built-in procedures.
    pub fn with_builtins() -> Self {
        let mut map = Self::new();
        map.register("ping", |_args| async {
            Ok(CapabilityOutcome::Single(serde_json::json!({})))
        });
        map
    }

    /// Register a procedure handler. A later registration under the same
    /// name replaces the earlier one.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Option<Arc<Value>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CapabilityOutcome, CapabilityError>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |args| Box::pin(handler(args))));
    }

    /// Register a streaming procedure from a producer closure.
    ///
    /// The producer receives the frame sender and runs in a spawned task;
    /// the invocation returns the receiving end immediately.
    pub fn register_streaming<F, Fut>(&mut self, name: impl Into<String>, producer: F)
    where
        F: Fn(Option<Arc<Value>>, mpsc::Sender<CapabilityFrame>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let producer = Arc::new(producer);
        self.register(name, move |args| {
            let producer = Arc::clone(&producer);
            async move {
                let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
                tokio::spawn(producer(args, tx));
                Ok(CapabilityOutcome::Stream(rx))
            }
        });
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no procedures are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait::async_trait]
impl CapabilityInvoker for ProcedureMap {
    async fn invoke(
        &self,
        procedure: &str,
        arguments: Option<Arc<Value>>,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let handler = self
            .handlers
            .get(procedure)
            .ok_or_else(|| CapabilityError::Unavailable {
                procedure: procedure.to_string(),
                reason: "Unknown procedure".to_string(),
            })?;

        debug!(procedure = %procedure, "Invoking procedure");
        handler(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_ping() {
        let map = ProcedureMap::with_builtins();
        let outcome = map.invoke("ping", None).await.expect("ping should succeed");
        match outcome {
            CapabilityOutcome::Single(value) => assert_eq!(value, serde_json::json!({})),
            other => panic!("Expected single result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_procedure_unavailable() {
        let map = ProcedureMap::new();
        let result = map.invoke("nonexistent", None).await;
        match result {
            Err(CapabilityError::Unavailable { procedure, .. }) => {
                assert_eq!(procedure, "nonexistent");
            }
            other => panic!("Expected Unavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_registered_procedure_receives_arguments() {
        let mut map = ProcedureMap::new();
        map.register("echo", |args| async move {
            let value = args
                .map(|a| (*a).clone())
                .unwrap_or(serde_json::json!(null));
            Ok(CapabilityOutcome::Single(value))
        });

        let args = Arc::new(serde_json::json!({"x": 1}));
        let outcome = map
            .invoke("echo", Some(args))
            .await
            .expect("echo should succeed");
        match outcome {
            CapabilityOutcome::Single(value) => assert_eq!(value, serde_json::json!({"x": 1})),
            other => panic!("Expected single result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invocation_error_passthrough() {
        let mut map = ProcedureMap::new();
        map.register("always_fails", |_args| async {
            Err(CapabilityError::Invocation {
                procedure: "always_fails".to_string(),
                code: -32099,
                message: "domain failure".to_string(),
                data: None,
            })
        });

        let result = map.invoke("always_fails", None).await;
        match result {
            Err(CapabilityError::Invocation { code, message, .. }) => {
                assert_eq!(code, -32099);
                assert_eq!(message, "domain failure");
            }
            other => panic!("Expected Invocation error, got {:?}", other.map(|_| ())),
        }

        // And the GateError conversion preserves the code.
        let gate_err: GateError = CapabilityError::Invocation {
            procedure: "always_fails".to_string(),
            code: -32099,
            message: "domain failure".to_string(),
            data: None,
        }
        .into();
        assert_eq!(gate_err.to_jsonrpc_code(), -32099);
    }

    #[tokio::test]
    async fn test_streaming_procedure_frames_in_order() {
        let mut map = ProcedureMap::new();
        map.register_streaming("countdown", |_args, tx| async move {
            for i in (1..=3).rev() {
                let _ = tx
                    .send(CapabilityFrame::Progress {
                        method: "notifications/progress".to_string(),
                        params: Some(serde_json::json!({"remaining": i})),
                    })
                    .await;
            }
            let _ = tx.send(CapabilityFrame::Done(serde_json::json!("done"))).await;
        });

        let outcome = map
            .invoke("countdown", None)
            .await
            .expect("countdown should start");
        let mut rx = match outcome {
            CapabilityOutcome::Stream(rx) => rx,
            other => panic!("Expected stream, got {:?}", other),
        };

        let mut remaining = Vec::new();
        let mut done = None;
        while let Some(frame) = rx.recv().await {
            match frame {
                CapabilityFrame::Progress { params, .. } => {
                    remaining.push(params.expect("progress params")["remaining"].clone());
                }
                CapabilityFrame::Done(value) => {
                    done = Some(value);
                    break;
                }
            }
        }

        assert_eq!(
            remaining,
            vec![
                serde_json::json!(3),
                serde_json::json!(2),
                serde_json::json!(1)
            ]
        );
        assert_eq!(done, Some(serde_json::json!("done")));
    }

    #[tokio::test]
    async fn test_replace_registration() {
        let mut map = ProcedureMap::new();
        map.register("p", |_| async { Ok(CapabilityOutcome::Single(serde_json::json!(1))) });
        map.register("p", |_| async { Ok(CapabilityOutcome::Single(serde_json::json!(2))) });
        assert_eq!(map.len(), 1);

        let outcome = map.invoke("p", None).await.expect("should succeed");
        match outcome {
            CapabilityOutcome::Single(v) => assert_eq!(v, serde_json::json!(2)),
            other => panic!("Expected single result, got {:?}", other),
        }
    }
}
