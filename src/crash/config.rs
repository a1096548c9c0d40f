use std::ffi::CStr;

pub const ENV_SIGNAL_SHOW_INFO: &str = "SIGNAL_SHOW_INFO";
pub const ENV_GDBSERVER_PORT: &str = "GDBSERVER_PORT";

/// Version identifier printed in every crash report.
pub const DEFAULT_VERSION_FILE: &CStr = c"/etc/sigmon/version";

/// Crash reporter settings, fixed once the handlers are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashReporterConfig {
    /// Skip installation entirely.
    pub disabled: bool,
    /// Attach `gdbserver` on this port before re-raising. Development only:
    /// the crashing process blocks until the debugger session ends.
    pub debug_server_port: Option<u16>,
    pub version_file: &'static CStr,
}

impl Default for CrashReporterConfig {
    fn default() -> Self {
        CrashReporterConfig {
            disabled: false,
            debug_server_port: None,
            version_file: DEFAULT_VERSION_FILE,
        }
    }
}

impl CrashReporterConfig {
    /// Reads `SIGNAL_SHOW_INFO` and `GDBSERVER_PORT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = CrashReporterConfig::default();

        if let Some(show_info) = lookup(ENV_SIGNAL_SHOW_INFO) {
            config.disabled = show_info.eq_ignore_ascii_case("disable")
                || show_info.eq_ignore_ascii_case("no");
        }

        if let Some(port) = lookup(ENV_GDBSERVER_PORT) {
            match port.trim().parse::<u16>() {
                Ok(0) => {}
                Ok(port) => config.debug_server_port = Some(port),
                Err(_) => log::warn!("Incorrect {ENV_GDBSERVER_PORT}={port}. Discarded..."),
            }
        }
        config
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> CrashReporterConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CrashReporterConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(config_from(&[]), CrashReporterConfig::default());
        assert!(!config_from(&[]).disabled);
    }

    #[test]
    fn test_show_info_toggle() {
        for value in ["disable", "DISABLE", "No", "no"] {
            assert!(config_from(&[(ENV_SIGNAL_SHOW_INFO, value)]).disabled);
        }
        for value in ["yes", "", "enable", "disabled"] {
            assert!(!config_from(&[(ENV_SIGNAL_SHOW_INFO, value)]).disabled);
        }
    }

    #[test]
    fn test_gdbserver_port() {
        assert_eq!(
            config_from(&[(ENV_GDBSERVER_PORT, "2345")]).debug_server_port,
            Some(2345)
        );
        assert_eq!(
            config_from(&[(ENV_GDBSERVER_PORT, " 2345\n")]).debug_server_port,
            Some(2345)
        );
        for value in ["0", "port", "-1", "70000", ""] {
            assert_eq!(
                config_from(&[(ENV_GDBSERVER_PORT, value)]).debug_server_port,
                None
            );
        }
    }
}
