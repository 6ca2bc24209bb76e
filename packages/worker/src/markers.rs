//! Diagnostic markers printed by generated export programs.
//!
//! The engine has no structured error channel; these fixed substrings are how
//! a program run reports what went wrong. The builder prints them and the
//! classifier looks for them.

pub const USER_SCRIPT_ERROR: &str = "USER_SCRIPT_ERROR";
pub const ZERO_OBJECTS_SELECTED: &str = "ZERO_OBJECTS_SELECTED";
pub const EXPORT_ERROR: &str = "EXPORT_ERROR";
pub const CRITICAL_EXPORT_ERROR: &str = "CRITICAL_EXPORT_ERROR";
pub const UNKNOWN_FORMAT: &str = "UNKNOWN_FORMAT";
pub const EXPORT_SUCCESS: &str = "EXPORT_SUCCESS";
pub const SELECTED_OBJECTS: &str = "SELECTED_OBJECTS";

/// Appended by the engine runner, not the program.
pub const ENGINE_TIMEOUT: &str = "ENGINE_TIMEOUT";
