pub mod attachment;
pub mod draft;
pub mod message;
pub mod notification;
pub mod retrieval;
