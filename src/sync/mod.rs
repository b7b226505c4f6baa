//! Cooperative-threading primitives shared by every CP and PP worker.

pub mod queue;
pub mod thread_handle;
pub mod waitable;

pub use queue::Queue;
pub use thread_handle::{ThreadHandle, ThreadState, Worker};
pub use waitable::Waitable;
