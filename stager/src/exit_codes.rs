//! Stable exit codes for stager CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration or usage; nothing on disk was touched.
pub const INVALID: i32 = 1;
/// Deployment failed; the previous app is at its original path (or there was none).
pub const FAILED: i32 = 2;
/// Deployment failed and the previous app is still in its holding directory.
pub const NEEDS_ATTENTION: i32 = 3;
