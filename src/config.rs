// src/config.rs

//! Environment-driven configuration for the binding layer.
//!
//! The only functional switch is `synchronize`, which opens the display in
//! synchronous (unbuffered) mode so X errors are reported against the request
//! that caused them. The remaining fields describe the session and are used to
//! reject a Wayland-only session before any connection attempt.

use serde::{Deserialize, Serialize};

use crate::error::{BindingError, Result};

/// Environment variable that enables synchronous protocol mode.
pub const SYNC_ENV_VAR: &str = "X11_CORE_SYNC";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Call `XSynchronize(display, True)` once the connection is open.
    pub synchronize: bool,
    /// Value of `DISPLAY`. `None` lets Xlib apply its own default.
    pub display: Option<String>,
    /// Value of `XDG_SESSION_TYPE` (`x11`, `wayland`, `tty`, ...).
    pub session_type: Option<String>,
    /// Value of `WAYLAND_DISPLAY`.
    pub wayland_display: Option<String>,
}

impl BindingConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        BindingConfig {
            synchronize: non_empty(SYNC_ENV_VAR)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            display: non_empty("DISPLAY"),
            session_type: non_empty("XDG_SESSION_TYPE"),
            wayland_display: non_empty("WAYLAND_DISPLAY"),
        }
    }

    /// Fails with `WrongPlatform` when the session is Wayland and no X display
    /// (XWayland or otherwise) has been exported.
    pub fn check_platform(&self) -> Result<()> {
        let wayland_session = self
            .session_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("wayland"))
            || self.wayland_display.is_some();
        if wayland_session && self.display.is_none() {
            return Err(BindingError::WrongPlatform(
                "Wayland session without an X display (DISPLAY is unset)".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> BindingConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BindingConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn sync_flag_accepts_common_truthy_spellings() {
        for value in ["1", "true", "TRUE", "yes", "on", " On "] {
            assert!(config_from(&[(SYNC_ENV_VAR, value)]).synchronize, "{value}");
        }
        for value in ["0", "false", "no", "off", "2", ""] {
            assert!(!config_from(&[(SYNC_ENV_VAR, value)]).synchronize, "{value}");
        }
        assert!(!config_from(&[]).synchronize);
    }

    #[test]
    fn empty_variables_are_treated_as_unset() {
        let config = config_from(&[("DISPLAY", ""), ("XDG_SESSION_TYPE", "x11")]);
        assert_eq!(config.display, None);
        assert_eq!(config.session_type.as_deref(), Some("x11"));
    }

    #[test]
    fn wayland_session_without_display_is_rejected() {
        let config = config_from(&[("XDG_SESSION_TYPE", "wayland")]);
        assert!(matches!(
            config.check_platform(),
            Err(BindingError::WrongPlatform(_))
        ));

        let config = config_from(&[("WAYLAND_DISPLAY", "wayland-0")]);
        assert!(config.check_platform().is_err());
    }

    #[test]
    fn xwayland_and_plain_x11_sessions_pass() {
        let xwayland = config_from(&[("XDG_SESSION_TYPE", "wayland"), ("DISPLAY", ":1")]);
        assert!(xwayland.check_platform().is_ok());

        let x11 = config_from(&[("XDG_SESSION_TYPE", "x11"), ("DISPLAY", ":0")]);
        assert!(x11.check_platform().is_ok());

        // No session information at all: let XOpenDisplay decide.
        assert!(config_from(&[]).check_platform().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: BindingConfig = serde_json::from_str(r#"{"synchronize": true}"#).unwrap();
        assert!(config.synchronize);
        assert_eq!(config.display, None);
    }
}
