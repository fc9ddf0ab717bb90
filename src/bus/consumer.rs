//! Consumers and how the bus obtains them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::ConsumeContext;
use crate::error::{BusError, ConsumeError};
use crate::message::Message;
use crate::pipeline::{Filter, PipeBuilder, RetryPolicy};
use crate::resolver::{DependencyResolver, ResolverScope};

/// Business logic for one message type.
///
/// ## Example
///
/// ```ignore
/// #[derive(Default)]
/// struct SubmitOrderConsumer;
///
/// #[async_trait]
/// impl Consumer<SubmitOrder> for SubmitOrderConsumer {
///     async fn consume(&self, context: &ConsumeContext<SubmitOrder>) -> Result<(), ConsumeError> {
///         let order = context.message();
///         context.publish(&OrderSubmitted { order_id: order.order_id.clone() }).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer<M: Message>: Send + Sync + 'static {
    async fn consume(&self, context: &ConsumeContext<M>) -> Result<(), ConsumeError>;
}

type HandlerFn<M> =
    Arc<dyn Fn(ConsumeContext<M>) -> BoxFuture<'static, Result<(), ConsumeError>> + Send + Sync>;

type ResolveConsumer<M> = fn(&dyn ResolverScope) -> Option<Arc<dyn Consumer<M>>>;

/// Where the consumer for each message comes from. Every variant yields an
/// isolated instance or scope per message.
pub(crate) enum ConsumerSource<M> {
    /// A fresh instance per message.
    Fresh(fn() -> Box<dyn Consumer<M>>),
    /// Resolved from a new resolver scope per message.
    Resolved {
        resolver: Arc<dyn DependencyResolver>,
        resolve: ResolveConsumer<M>,
        type_name: &'static str,
    },
    /// A closure over an owned context.
    Handler(HandlerFn<M>),
}

impl<M: Message> ConsumerSource<M> {
    pub(crate) fn fresh<C: Consumer<M> + Default>() -> Self {
        ConsumerSource::Fresh(|| Box::new(C::default()))
    }

    pub(crate) fn resolved<C: Consumer<M>>(resolver: Arc<dyn DependencyResolver>) -> Self {
        ConsumerSource::Resolved {
            resolver,
            resolve: |scope| scope.resolve::<C>().map(|consumer| consumer as Arc<dyn Consumer<M>>),
            type_name: std::any::type_name::<C>(),
        }
    }

    pub(crate) fn handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(ConsumeContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ConsumeError>> + Send + 'static,
    {
        ConsumerSource::Handler(Arc::new(move |context| Box::pin(handler(context))))
    }

    pub(crate) async fn invoke(&self, context: &ConsumeContext<M>) -> Result<(), BusError> {
        match self {
            ConsumerSource::Fresh(create) => create().consume(context).await?,
            ConsumerSource::Resolved {
                resolver,
                resolve,
                type_name,
            } => {
                let scope = resolver.create_scope();
                let consumer =
                    resolve(scope.as_ref()).ok_or(BusError::MissingDependency(type_name))?;
                consumer.consume(context).await?;
            }
            ConsumerSource::Handler(handler) => handler(context.clone()).await?,
        }
        Ok(())
    }
}

/// Per-consumer options supplied at registration.
///
/// Filters added here run inside the bus's tracing, error-routing and
/// fault filters, in the order they were added, just before the consumer.
pub struct ConsumerOptions<M: Message> {
    pub(crate) queue: Option<String>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) filters: PipeBuilder<ConsumeContext<M>>,
    pub(crate) concurrency_limit: Option<usize>,
}

impl<M: Message> ConsumerOptions<M> {
    pub(crate) fn new(default_retry: Option<RetryPolicy>) -> Self {
        Self {
            queue: None,
            retry: default_retry,
            filters: PipeBuilder::new(),
            concurrency_limit: None,
        }
    }

    /// Consume from `queue` instead of the derived queue name.
    pub fn queue(&mut self, queue: impl Into<String>) -> &mut Self {
        self.queue = Some(queue.into());
        self
    }

    /// Retry failures in-process. Replaces the bus-wide default.
    pub fn use_retry(&mut self, policy: RetryPolicy) -> &mut Self {
        self.retry = Some(policy);
        self
    }

    pub fn use_filter<F: Filter<ConsumeContext<M>> + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.add_filter(filter);
        self
    }

    /// Use a filter resolved from the bus's dependency resolver.
    pub fn use_resolved_filter<F>(&mut self) -> &mut Self
    where
        F: Filter<ConsumeContext<M>> + Send + Sync + 'static,
    {
        self.filters.add_resolved::<F>();
        self
    }

    /// Run a callback against each context before the consumer.
    pub fn use_execute<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&mut ConsumeContext<M>) + Send + Sync + 'static,
    {
        self.filters = std::mem::take(&mut self.filters).with_execute(callback);
        self
    }

    /// Frames the consumer's endpoint handles concurrently.
    pub fn concurrency_limit(&mut self, limit: usize) -> &mut Self {
        self.concurrency_limit = Some(limit.max(1));
        self
    }
}
