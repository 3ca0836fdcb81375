pub mod retrieval;
pub mod send;

pub use retrieval::{RetrievalWorker, RetrieveDecoder};
pub use send::SendWorker;
