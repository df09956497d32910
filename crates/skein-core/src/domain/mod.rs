//! Domain model (ids, tasks, outcomes, config, state, report).
//!
//! I/O を持たない純粋な型だけを置く。transport や runtime への依存は ports/app 側。

pub mod config;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod policy;
pub mod report;
pub mod state;
pub mod task;

pub use config::{DispatchConfig, MAX_WORKERS};
pub use errors::{ConfigurationError, RunError, TransportError};
pub use ids::{RunId, WorkerId};
pub use outcome::{FailureCause, Outcome, OutcomeKind, ResultSlot, TaskFailure};
pub use policy::{ParsePolicyError, SchedulingPolicy};
pub use report::{RunCounts, RunReport, Termination, WorkerSummary};
pub use state::{DispatchPhase, WorkerHandle, WorkerStatus};
pub use task::{Assignment, Task};
