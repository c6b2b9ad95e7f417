//! Environment markers consumed and produced by the relaunch bridge.
//!
//! The relaunched child inherits [`NO_RELAUNCH`] so it never attempts a
//! second relaunch. The remaining markers let an operator force a launch
//! path or turn on diagnostic output without touching configuration.

/// Set in the child's environment; a process seeing it must not relaunch.
pub const NO_RELAUNCH: &str = "MACGO_NO_RELAUNCH";

/// Enables debug verbosity (diagnostic logs and stream tee files).
pub const DEBUG: &str = "MACGO_DEBUG";

/// Forces direct execution of the packaged binary.
pub const FORCE_DIRECT: &str = "MACGO_FORCE_DIRECT";

/// Forces the indirect (launch services) path regardless of capabilities.
pub const FORCE_LAUNCH_SERVICES: &str = "MACGO_FORCE_LAUNCH_SERVICES";

/// Snapshot of the boolean environment markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvMarkers {
    /// Relaunching is suppressed for this process.
    pub no_relaunch: bool,
    /// Debug verbosity requested.
    pub debug: bool,
    /// Direct execution requested.
    pub force_direct: bool,
    /// Indirect launch requested.
    pub force_launch_services: bool,
}

impl EnvMarkers {
    /// Read markers from the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read markers through an arbitrary lookup function.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|value| parse_flag(&value));
        Self {
            no_relaunch: flag(NO_RELAUNCH),
            debug: flag(DEBUG),
            force_direct: flag(FORCE_DIRECT),
            force_launch_services: flag(FORCE_LAUNCH_SERVICES),
        }
    }
}

/// Interpret a marker value as a boolean.
///
/// `1`, `true`, `yes` and `on` (any case, surrounding whitespace ignored)
/// are true; everything else, including the empty string, is false.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
