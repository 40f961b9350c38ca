//! Small helpers shared across the scheduler: currently just logging setup.

pub mod logging;
