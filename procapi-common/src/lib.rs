//! procapi Common Types
//!
//! Contracts shared between the prediction gateway and the backend workers.

pub mod envelope;
pub mod prediction;

pub use envelope::{parse_backend_output, BackendMessage, EnvelopeError, MessageKind};
pub use prediction::{InputData, OutputData};
