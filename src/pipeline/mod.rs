//! Pipe/filter engine.
//!
//! A [`Pipe`] executes behavior against a context. A [`Filter`] wraps the
//! rest of the chain: it receives the context plus a `next` pipe and decides
//! whether to call it (zero or more times), and what to do with its result.
//!
//! ```text
//!  PipeBuilder [f1, f2, f3]  ──build()──▶  f1 → f2 → f3 → EmptyPipe
//!
//!  built in reverse: EmptyPipe, then FilterPipe(f3, ·), FilterPipe(f2, ·) …
//! ```
//!
//! Filters run in registration order on the way in. Errors propagate back
//! through every filter that called `next`, unless a filter handles them.

mod execute;
mod retry;

pub use execute::ExecuteFilter;
pub use retry::{RetryFilter, RetryPolicy};

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::PipeContext;
use crate::error::BusError;
use crate::resolver::ResolverScope;

/// Executes behavior against a context.
#[async_trait]
pub trait Pipe<C: Send>: Send + Sync {
    async fn send(&self, context: &mut C) -> Result<(), BusError>;
}

/// Reusable middleware composed with a continuation.
#[async_trait]
pub trait Filter<C: Send>: Send + Sync {
    async fn send(&self, context: &mut C, next: &dyn Pipe<C>) -> Result<(), BusError>;
}

/// Terminal pipe that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPipe;

#[async_trait]
impl<C: Send> Pipe<C> for EmptyPipe {
    async fn send(&self, _context: &mut C) -> Result<(), BusError> {
        Ok(())
    }
}

/// A filter bound to the pipe it continues into.
pub struct FilterPipe<C> {
    filter: Arc<dyn Filter<C>>,
    next: Arc<dyn Pipe<C>>,
}

impl<C: Send> FilterPipe<C> {
    pub fn new(filter: Arc<dyn Filter<C>>, next: Arc<dyn Pipe<C>>) -> Self {
        Self { filter, next }
    }
}

#[async_trait]
impl<C: Send + 'static> Pipe<C> for FilterPipe<C> {
    async fn send(&self, context: &mut C) -> Result<(), BusError> {
        self.filter.send(context, self.next.as_ref()).await
    }
}

type ResolveFilter<C> = Arc<dyn Fn(&dyn ResolverScope) -> Option<Arc<dyn Filter<C>>> + Send + Sync>;

enum FilterFactory<C> {
    Literal(Arc<dyn Filter<C>>),
    Resolved {
        type_name: &'static str,
        resolve: ResolveFilter<C>,
    },
}

impl<C> Clone for FilterFactory<C> {
    fn clone(&self) -> Self {
        match self {
            FilterFactory::Literal(filter) => FilterFactory::Literal(Arc::clone(filter)),
            FilterFactory::Resolved { type_name, resolve } => FilterFactory::Resolved {
                type_name: *type_name,
                resolve: Arc::clone(resolve),
            },
        }
    }
}

/// Ordered list of filter factories that builds a [`Pipe`].
///
/// ## Example
///
/// ```ignore
/// let pipe = PipeBuilder::new()
///     .with_filter(TracingFilter)
///     .with_retry(RetryPolicy::immediate(3))
///     .with_resolved::<AuditFilter>()
///     .build(Some(scope.as_ref()))?;
/// pipe.send(&mut context).await?;
/// ```
pub struct PipeBuilder<C> {
    factories: Vec<FilterFactory<C>>,
}

impl<C> Default for PipeBuilder<C> {
    fn default() -> Self {
        Self {
            factories: Vec::new(),
        }
    }
}

impl<C> Clone for PipeBuilder<C> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<C: PipeContext + 'static> PipeBuilder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter instance.
    pub fn with_filter<F: Filter<C> + 'static>(mut self, filter: F) -> Self {
        self.add_filter(filter);
        self
    }

    /// Append a shared filter instance.
    pub fn with_shared(mut self, filter: Arc<dyn Filter<C>>) -> Self {
        self.factories.push(FilterFactory::Literal(filter));
        self
    }

    /// Append a filter resolved from the dependency scope at build time.
    pub fn with_resolved<F>(mut self) -> Self
    where
        F: Filter<C> + Any + Send + Sync + 'static,
    {
        self.add_resolved::<F>();
        self
    }

    /// Append a retry filter.
    pub fn with_retry(self, policy: RetryPolicy) -> Self {
        self.with_filter(RetryFilter::new(policy))
    }

    /// Append a callback that runs before the rest of the chain.
    pub fn with_execute<F>(self, callback: F) -> Self
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.with_filter(ExecuteFilter::new(callback))
    }

    pub fn add_filter<F: Filter<C> + 'static>(&mut self, filter: F) {
        self.factories.push(FilterFactory::Literal(Arc::new(filter)));
    }

    pub fn add_resolved<F>(&mut self)
    where
        F: Filter<C> + Any + Send + Sync + 'static,
    {
        self.factories.push(FilterFactory::Resolved {
            type_name: std::any::type_name::<F>(),
            resolve: Arc::new(|scope: &dyn ResolverScope| {
                scope
                    .resolve::<F>()
                    .map(|filter| filter as Arc<dyn Filter<C>>)
            }),
        });
    }

    /// Append every factory of `other` after this builder's own.
    pub fn extend(&mut self, other: PipeBuilder<C>) {
        self.factories.extend(other.factories);
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build the chain, terminating in [`EmptyPipe`].
    ///
    /// Resolved filters need a scope; without one, or if the scope cannot
    /// supply the filter, this fails with [`BusError::MissingDependency`].
    pub fn build(self, scope: Option<&dyn ResolverScope>) -> Result<Arc<dyn Pipe<C>>, BusError> {
        self.build_onto(Arc::new(EmptyPipe), scope)
    }

    /// Build the chain in front of an existing pipe.
    pub fn build_onto(
        self,
        terminal: Arc<dyn Pipe<C>>,
        scope: Option<&dyn ResolverScope>,
    ) -> Result<Arc<dyn Pipe<C>>, BusError> {
        let mut pipe = terminal;
        for factory in self.factories.into_iter().rev() {
            let filter = match factory {
                FilterFactory::Literal(filter) => filter,
                FilterFactory::Resolved { type_name, resolve } => scope
                    .and_then(|scope| resolve(scope))
                    .ok_or(BusError::MissingDependency(type_name))?,
            };
            pipe = Arc::new(FilterPipe::new(filter, pipe));
        }
        Ok(pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SendContext;
    use crate::resolver::{DependencyResolver, ServiceRegistry};
    use parking_lot::Mutex;
    use serde_json::Value;

    /// Records its name on the way in and out.
    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter<SendContext> for Trace {
        async fn send(
            &self,
            context: &mut SendContext,
            next: &dyn Pipe<SendContext>,
        ) -> Result<(), BusError> {
            self.log.lock().push(format!("{}:in", self.name));
            let result = next.send(context).await;
            self.log.lock().push(format!("{}:out", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Filter<SendContext> for ShortCircuit {
        async fn send(
            &self,
            _context: &mut SendContext,
            _next: &dyn Pipe<SendContext>,
        ) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn context() -> SendContext {
        SendContext::from_value(Value::Null, vec!["urn:message:Test:Ping".into()])
    }

    #[tokio::test]
    async fn filters_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipe = PipeBuilder::new()
            .with_filter(Trace { name: "a", log: log.clone() })
            .with_filter(Trace { name: "b", log: log.clone() })
            .build(None)
            .unwrap();

        pipe.send(&mut context()).await.unwrap();
        assert_eq!(*log.lock(), vec!["a:in", "b:in", "b:out", "a:out"]);
    }

    #[tokio::test]
    async fn filter_may_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipe = PipeBuilder::new()
            .with_filter(ShortCircuit)
            .with_filter(Trace { name: "inner", log: log.clone() })
            .build(None)
            .unwrap();

        pipe.send(&mut context()).await.unwrap();
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn resolved_filters_come_from_scope() {
        let registry = ServiceRegistry::new().with_singleton(ShortCircuit);
        let scope = registry.create_scope();

        let pipe = PipeBuilder::<SendContext>::new()
            .with_resolved::<ShortCircuit>()
            .build(Some(scope.as_ref()));
        assert!(pipe.is_ok());

        let missing = PipeBuilder::<SendContext>::new()
            .with_resolved::<ShortCircuit>()
            .build(None);
        assert!(matches!(missing, Err(BusError::MissingDependency(_))));
    }

    #[tokio::test]
    async fn execute_runs_before_continuing() {
        let pipe = PipeBuilder::new()
            .with_execute(|context: &mut SendContext| context.headers_mut().set("stamp", "1"))
            .build(None)
            .unwrap();

        let mut context = context();
        pipe.send(&mut context).await.unwrap();
        assert_eq!(context.headers().get("stamp"), Some("1"));
    }
}
