//! Ports layer - contracts between the runtime and hosted machines.

mod machine;

pub use machine::{MachineAdapter, MachineError};
