//! Central Memory: the shared store every CP and every IOU accesses
//! through a [`CMPort`].

pub mod central;
pub mod port;

pub use central::{CentralMemory, EvictionRange};
pub use port::{CMPort, CmTransaction};
