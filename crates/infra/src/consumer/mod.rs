//! Consumer side: group membership, per-record processing, shutdown.

pub mod runner;
pub mod shutdown;

pub use runner::{
    ConsumerError, ConsumerGroupRunner, RunnerConfig, RunnerHandle, RunnerState, RunnerStats,
};
pub use shutdown::termination_signal;
