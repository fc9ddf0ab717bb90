//! Bus integration tests over the in-memory transport.

mod support;
mod batch;
mod consume;
mod faults;
mod lifecycle;
mod orders;
mod request;
mod retry;
