#![forbid(unsafe_code)]

//! Jobs: persisted records, their agent processes and the transitions between states.

pub mod lifecycle;
pub mod liveness;
pub mod model;
pub mod process;
pub mod store;
pub mod supervisor;
