//! A small composable `(ctx, next) -> result` middleware stack for wrapping
//! provider calls with cross-cutting concerns (timeouts, tracing spans).
//!
//! Grounded on `packages/server-rust/src/service/middleware/{pipeline,
//! timeout,metrics}.rs`'s layered `ServiceBuilder::new().layer(..).layer(..)`
//! idiom, generalized away from `tower::Service`: that trait fixes a single
//! `Request`/`Response`/`Error` shape per pipeline, but the five providers in
//! this crate each call through with a different result type (`MutexGuard`,
//! `SemaphoreTicket`, `T` from a circuit-broken closure, ...). A pipeline
//! here is built once per call site for whatever `T` that call produces,
//! rather than once per service for one fixed `Operation` enum.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

/// A boxed, owned future, the common currency passed between layers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Context threaded through a pipeline; layers read it, the handler doesn't
/// need to.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// Name of the operation being wrapped, used for tracing spans and
    /// timeout error messages.
    pub operation: String,
    /// Timeout applied by [`TimeoutMiddleware`] if present in the stack.
    /// `None` means no timeout is enforced.
    pub call_timeout: Option<Duration>,
}

impl MiddlewareContext {
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            call_timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// The remainder of the chain below a given layer, callable exactly once.
pub struct Next<T> {
    inner: Box<dyn FnOnce(MiddlewareContext) -> BoxFuture<Result<T, anyhow::Error>> + Send>,
}

impl<T: Send + 'static> Next<T> {
    fn new<F>(f: F) -> Self
    where
        F: FnOnce(MiddlewareContext) -> BoxFuture<Result<T, anyhow::Error>> + Send + 'static,
    {
        Self { inner: Box::new(f) }
    }

    /// Invokes the rest of the chain with `ctx`.
    pub fn call(self, ctx: MiddlewareContext) -> BoxFuture<Result<T, anyhow::Error>> {
        (self.inner)(ctx)
    }
}

/// One layer of the stack. `call` receives the context and the rest of the
/// chain and decides whether, and how, to invoke it.
pub trait Middleware<T>: Send + Sync {
    fn call(&self, ctx: MiddlewareContext, next: Next<T>) -> BoxFuture<Result<T, anyhow::Error>>;
}

/// An ordered stack of layers wrapping a terminal handler, outermost first.
///
/// Built fresh per call site (`Pipeline::new().layer(a).layer(b).run(...)`)
/// since `T` varies with what the wrapped call returns; layers themselves
/// (`Arc<dyn Middleware<T>>`) are cheap to share across calls.
pub struct Pipeline<T> {
    layers: Vec<Arc<dyn Middleware<T>>>,
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self { layers: Vec::new() }
    }
}

impl<T: Send + 'static> Pipeline<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer; layers added first run outermost.
    #[must_use]
    pub fn layer(mut self, middleware: Arc<dyn Middleware<T>>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Runs the stack around `handler`, outermost layer first.
    pub async fn run<F>(&self, ctx: MiddlewareContext, handler: F) -> Result<T, anyhow::Error>
    where
        F: FnOnce() -> BoxFuture<Result<T, anyhow::Error>> + Send + 'static,
    {
        let mut next = Next::new(move |_ctx: MiddlewareContext| handler());
        for middleware in self.layers.iter().rev() {
            let middleware = Arc::clone(middleware);
            let inner_next = next;
            next = Next::new(move |ctx: MiddlewareContext| middleware.call(ctx, inner_next));
        }
        next.call(ctx).await
    }
}

// ---------------------------------------------------------------------------
// TimeoutMiddleware
// ---------------------------------------------------------------------------

/// Rejects a call that exceeds `ctx.call_timeout` with an error naming the
/// operation and the timeout, mirroring the teacher's `OperationError::Timeout`.
#[derive(Debug, Clone, Default)]
pub struct TimeoutMiddleware;

impl<T: Send + 'static> Middleware<T> for TimeoutMiddleware {
    fn call(&self, ctx: MiddlewareContext, next: Next<T>) -> BoxFuture<Result<T, anyhow::Error>> {
        Box::pin(async move {
            let Some(timeout) = ctx.call_timeout else {
                return next.call(ctx).await;
            };
            let operation = ctx.operation.clone();
            match tokio::time::timeout(timeout, next.call(ctx)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(anyhow::anyhow!(
                    "operation {operation} exceeded its {timeout:?} timeout"
                )),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// TracingMiddleware
// ---------------------------------------------------------------------------

/// Wraps a call in a `tracing` span recording its duration and outcome, the
/// same span-based approach the teacher uses in place of a metrics crate.
#[derive(Debug, Clone, Default)]
pub struct TracingMiddleware;

impl<T: Send + 'static> Middleware<T> for TracingMiddleware {
    fn call(&self, ctx: MiddlewareContext, next: Next<T>) -> BoxFuture<Result<T, anyhow::Error>> {
        let span = tracing::info_span!("coordix_operation", operation = %ctx.operation);
        Box::pin(
            async move {
                let started = tokio::time::Instant::now();
                let operation = ctx.operation.clone();
                let result = next.call(ctx).await;
                let elapsed = started.elapsed();
                match &result {
                    Ok(_) => tracing::debug!(operation = %operation, elapsed_ms = elapsed.as_millis(), "operation ok"),
                    Err(error) => {
                        tracing::warn!(operation = %operation, elapsed_ms = elapsed.as_millis(), error = %error, "operation failed");
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ctx(op: &str) -> MiddlewareContext {
        MiddlewareContext::new(op)
    }

    #[tokio::test]
    async fn pipeline_with_no_layers_runs_handler_directly() {
        let pipeline: Pipeline<u32> = Pipeline::new();
        let result = pipeline.run(ctx("noop"), || Box::pin(async { Ok(7) })).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn timeout_middleware_passes_through_fast_calls() {
        let pipeline: Pipeline<u32> = Pipeline::new().layer(Arc::new(TimeoutMiddleware));
        let result = pipeline
            .run(ctx("fast").with_timeout(Duration::from_millis(200)), || {
                Box::pin(async { Ok(42) })
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn timeout_middleware_rejects_slow_calls() {
        let pipeline: Pipeline<u32> = Pipeline::new().layer(Arc::new(TimeoutMiddleware));
        let err = pipeline
            .run(ctx("slow").with_timeout(Duration::from_millis(10)), || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(1)
                })
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("slow"));
    }

    #[tokio::test]
    async fn layers_compose_outermost_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct Tagging {
            tag: &'static str,
            order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        }
        impl Middleware<u32> for Tagging {
            fn call(&self, ctx: MiddlewareContext, next: Next<u32>) -> BoxFuture<Result<u32, anyhow::Error>> {
                self.order.lock().unwrap().push(self.tag);
                next.call(ctx)
            }
        }

        let pipeline: Pipeline<u32> = Pipeline::new()
            .layer(Arc::new(Tagging {
                tag: "outer",
                order: Arc::clone(&order),
            }))
            .layer(Arc::new(Tagging {
                tag: "inner",
                order: Arc::clone(&order),
            }));

        pipeline.run(ctx("order"), || Box::pin(async { Ok(0u32) })).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn tracing_middleware_does_not_alter_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let pipeline: Pipeline<u32> = Pipeline::new().layer(Arc::new(TracingMiddleware));
        let result = pipeline
            .run(ctx("traced"), move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(5) })
            })
            .await
            .unwrap();
        assert_eq!(result, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
