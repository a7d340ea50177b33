//! Parity Verify - differential verification of transpiler output
//!
//! Provides the execution half of the harness:
//! - Runs external tools with hard timeouts and process-group cleanup
//! - Drives each corpus item through transpile, compile, both runs and compare
//! - Schedules items on a bounded worker pool
//! - Evaluates the run against the verification gate

pub mod driver;
pub mod gate;
pub mod pipeline;
pub mod pool;
pub mod runner;
pub mod session;
pub mod stage;

// Re-export key types
pub use driver::{
    CandidateDriver, CompileDriver, ItemWorkspace, ReferenceDriver, StageArtifacts, StageDriver,
    StageDrivers, TranspileDriver,
};
pub use gate::{GateVerdict, ParityGate};
pub use pipeline::{first_difference_line, ParityPipeline};
pub use pool::{PoolMetrics, ResultStream, WorkerPool};
pub use runner::{
    CommandOutcome, CommandOutput, CommandRunner, CommandSpec, RunnerError, StreamCapture,
};
pub use session::{run_verification, VerificationRun};
pub use stage::{Placeholders, StageConfig};
