//! Per-operation state carried through pipelines.
//!
//! ```text
//!   outbound                               inbound
//! ┌──────────────┐                     ┌────────────────┐
//! │ SendContext  │  serialize()        │ ReceiveContext │  decoded frame,
//! │ (mutable,    │ ──────────────────▶ │ (read-only)    │  typed payload cache
//! │  one per op) │   TransportMessage  └───────┬────────┘
//! └──────────────┘                             │ typed
//!                                              ▼
//!                                     ┌───────────────────┐
//!                                     │ ConsumeContext<M> │ publish / send /
//!                                     │                   │ forward / respond
//!                                     └───────────────────┘
//! ```
//!
//! Every context carries a cancellation token and implements
//! [`PipeContext`], so generic filters (retry, tracing) work over any of them.

mod consume;
pub mod headers;
mod host;
mod receive;
mod send;

pub use consume::ConsumeContext;
pub use headers::Headers;
pub use host::HostInfo;
pub use receive::ReceiveContext;
pub use send::{PublishContext, SendContext, SendKind};

use tokio_util::sync::CancellationToken;

/// State shared by every context type a pipe can run over.
pub trait PipeContext: Send {
    /// Cancellation signal for the operation.
    fn cancellation(&self) -> &CancellationToken;

    /// Zero-based retry attempt currently executing.
    fn retry_attempt(&self) -> u32 {
        0
    }

    /// Called by the retry filter before each attempt.
    fn set_retry_attempt(&mut self, _attempt: u32) {}
}
