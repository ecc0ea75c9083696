//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure, including failed commit steps
pub const ERROR: i32 = 1;

/// Validation error - control tables or templates did not pass
pub const VALIDATION_ERROR: i32 = 2;

/// IO error - install directory missing, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or configuration (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
