//! Pipeline structures and the cycle-stepped driver.

pub mod deps;
pub mod engine;
pub mod lsq;
pub mod memory;
pub mod queue;
pub mod rob;
pub mod sequence;
pub mod token;
pub mod unit;
