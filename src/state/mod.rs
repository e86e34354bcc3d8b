//! State module for tracking job progress
//!
//! # Components
//!
//! - `DriverState`: Lifecycle of a batch driver (idle, running, and the terminal states)

mod driver_state;

pub use driver_state::DriverState;
