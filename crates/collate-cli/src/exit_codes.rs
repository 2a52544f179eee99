//! Exit codes for `collate`.
//! These codes are part of the public contract; scripts branch on them.

pub const SUCCESS: i32 = 0;
pub const STAGE_FAILED: i32 = 1; // Assemble, seal, persist or publish failed
pub const CONFIG_ERROR: i32 = 2; // Bad configuration, usage or store setup
pub const RESOLUTION_FAILED: i32 = 3; // Manifest source unreadable
pub const PARTIAL: i32 = 4; // Completed with failed entries and --fail-on-partial
pub const REPORT_FAILED: i32 = 5; // Link published, --report file not written
