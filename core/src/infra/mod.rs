//! Infrastructure layer - external interfaces

pub mod event;
pub mod queue;
pub mod store;
pub mod transport;
