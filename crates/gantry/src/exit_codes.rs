//! Exit codes for the CLI

/// Configuration missing or invalid
pub const CONFIG_ERROR: i32 = 2;

/// At least one task failed or could not be recorded
pub const TASK_FAILED: i32 = 3;
