//! Background services

pub mod sync;
