//! On-demand invocation records and their type-erased body contract (§3,
//! §4.6).
//!
//! Bodies are registered once with concrete argument/return types but
//! stored behind a single object-safe trait so the scheduler's registries
//! don't need to be generic over every body that has ever been registered.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::error::{BodyError, MachinaError};
use crate::group::ConcurrentGroup;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type DynAny = Box<dyn Any + Send>;

/// Object-safe execute body: takes type-erased arguments, returns a
/// type-erased result or a [`BodyError`].
pub trait ExecuteHandler: Send + Sync {
    fn call(&self, args: DynAny) -> BoxFuture<Result<DynAny, BodyError>>;
}

struct TypedHandler<F> {
    f: F,
}

impl<A, R, F, Fut> ExecuteHandler for TypedHandler<F>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BodyError>> + Send + 'static,
{
    fn call(&self, args: DynAny) -> BoxFuture<Result<DynAny, BodyError>> {
        let args = *args
            .downcast::<A>()
            .unwrap_or_else(|_| panic!("execute invoked with mismatched argument type"));
        let fut = (self.f)(args);
        Box::pin(async move {
            let out = fut.await?;
            Ok(Box::new(out) as DynAny)
        })
    }
}

/// Wrap a strongly-typed async function as a type-erased [`ExecuteHandler`].
pub fn into_execute_handler<A, R, F, Fut>(f: F) -> Arc<dyn ExecuteHandler>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BodyError>> + Send + 'static,
{
    Arc::new(TypedHandler { f })
}

/// An execute record: `{ name, body, groups }` (§3). Immutable after
/// registration.
#[derive(Clone)]
pub struct ExecuteRecord {
    pub(crate) name: String,
    pub(crate) body: Arc<dyn ExecuteHandler>,
    pub(crate) groups: Vec<ConcurrentGroup>,
}

/// Handle to a spawned execute invocation. Resolves to the body's return
/// value, or to a [`MachinaError`] if the body errored or the task was
/// cancelled/panicked — a thin wrapper over a raw
/// `tokio::task::JoinHandle`.
pub struct ExecuteHandle<T> {
    pub(crate) inner: JoinHandle<Result<T, MachinaError>>,
}

impl<T> Future for ExecuteHandle<T> {
    type Output = Result<T, MachinaError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // JoinHandle<T> is unconditionally Unpin, so ExecuteHandle<T> is too;
        // no unsafe projection needed to reach the field.
        let this = Pin::get_mut(self);
        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join_err)) => {
                Poll::Ready(Err(MachinaError::Body(BodyError::new(join_err))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> ExecuteHandle<T> {
    /// Cancel the underlying task.
    pub fn abort(&self) {
        self.inner.abort();
    }
}
