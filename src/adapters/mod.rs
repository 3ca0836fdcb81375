pub mod bus;
pub mod transport;
