//! Per-dataset lifecycle: state classification, the state machine, and
//! destructive cleanup.

pub mod cleanup;
pub mod machine;
pub mod state;
