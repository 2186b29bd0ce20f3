//! Transfer engine: planning, execution, verification and reporting

mod executor;
mod planner;
mod report;
mod retry;
mod task;
mod verify;

pub use executor::{Executor, ExecutorOptions, NoopObserver, TransferObserver, execute};
pub use planner::{TaskStream, plan, plan_stream, plan_with};
pub use report::{MigrationReport, ReportAccumulator};
pub use retry::RetryPolicy;
pub use task::{TaskKind, TaskStatus, TransferTask};
pub use verify::{VerificationResult, verify};
