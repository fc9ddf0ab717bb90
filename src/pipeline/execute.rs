use std::sync::Arc;

use async_trait::async_trait;

use super::{Filter, Pipe};
use crate::error::BusError;

/// Runs a callback against the context, then always continues.
pub struct ExecuteFilter<C> {
    callback: Arc<dyn Fn(&mut C) + Send + Sync>,
}

impl<C> ExecuteFilter<C> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl<C: Send + 'static> Filter<C> for ExecuteFilter<C> {
    async fn send(&self, context: &mut C, next: &dyn Pipe<C>) -> Result<(), BusError> {
        (self.callback)(context);
        next.send(context).await
    }
}
