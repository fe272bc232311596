//! Stable process exit codes, for alerting on the kind of failure.

/// The pipeline reached `DONE`.
pub const OK: i32 = 0;
/// Unexpected internal failure (I/O, serialization, invariant violation).
pub const INTERNAL: i32 = 1;
/// Missing or invalid configuration, including credentials.
pub const CONFIG: i32 = 2;
/// The external agent tool is not installed or not reachable.
pub const TOOL_UNAVAILABLE: i32 = 3;
/// A pipeline stage failed.
pub const STAGE_FAILED: i32 = 4;
/// The run was cancelled by a signal or the overall runtime budget.
pub const CANCELLED: i32 = 5;
