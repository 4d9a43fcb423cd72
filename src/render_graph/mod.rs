//! Render Graph System
//!
//! Resources and operations connected by typed edges. Compiling a graph layers its operations
//! into passes, creates the physical backings and records one set of command buffers per frame
//! in flight, with every layout transition explicit.

pub mod compile_result;
pub mod connection;
pub mod graph;
pub mod operation;
pub mod pass;
pub mod resource;

pub use compile_result::*;
pub use connection::*;
pub use graph::*;
pub use operation::{
    DrawSpec, Operation, OperationId, PresentOperation, RenderOperation, TransferOperation,
    VertexInput,
};
pub use pass::*;
pub use resource::*;
