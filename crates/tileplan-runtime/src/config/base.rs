use super::{
    compilation::{CompilationConfig, CompilationLogLevel},
    plan::PlanConfig,
    profiling::{ProfilingConfig, ProfilingLogLevel},
};
use alloc::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static TILEPLAN_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Global configuration of tileplan, combining plan, compilation and profiling settings.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration of the plan builders.
    #[serde(default)]
    pub plan: PlanConfig,

    /// Configuration for compilation logs.
    #[serde(default)]
    pub compilation: CompilationConfig,

    /// Configuration for execution profiling logs.
    #[serde(default)]
    pub profiling: ProfilingConfig,
}

/// Error raised when a configuration file can't be used.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Can't read the configuration file\nCaused by:\n  {0}")]
    Io(#[from] std::io::Error),

    #[error("The configuration file doesn't have the right format\nCaused by:\n  {0}")]
    Format(#[from] toml::de::Error),
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `tileplan.toml` in the current
    /// directory or its parents, then applies the environment overrides. If no file is found, a
    /// default configuration is used.
    pub fn get() -> Arc<Self> {
        let mut state = TILEPLAN_GLOBAL_CONFIG.lock();

        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                let config = Arc::new(Self::from_current_dir().override_from_env());
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    pub fn set(config: Self) {
        let mut state = TILEPLAN_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref()).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }

    /// Overrides configuration fields based on `TILEPLAN_DEBUG_LOG` and `TILEPLAN_DEBUG_OPTION`.
    pub fn override_from_env(self) -> Self {
        let mut config = self;

        if let Ok(val) = std::env::var("TILEPLAN_DEBUG_LOG") {
            config = config.with_debug_log(&val);
        }
        if let Ok(val) = std::env::var("TILEPLAN_DEBUG_OPTION") {
            config = config.with_debug_option(&val);
        }

        config
    }

    /// Apply a `TILEPLAN_DEBUG_LOG` value: `stdout`, `stderr`, `1`/`true` for the default log
    /// file, `0`/`false` to disable, anything else is a file path.
    pub fn with_debug_log(mut self, val: &str) -> Self {
        self.compilation.logger.level = CompilationLogLevel::Full;
        self.profiling.logger.level = ProfilingLogLevel::Basic;

        match val {
            "stdout" => {
                self.compilation.logger.stdout = true;
                self.profiling.logger.stdout = true;
            }
            "stderr" => {
                self.compilation.logger.stderr = true;
                self.profiling.logger.stderr = true;
            }
            "1" | "true" => {
                let file_path = "/tmp/tileplan.log";
                self.compilation.logger.file = Some(file_path.into());
                self.profiling.logger.file = Some(file_path.into());
            }
            "0" | "false" => {
                self.compilation.logger.level = CompilationLogLevel::Disabled;
                self.profiling.logger.level = ProfilingLogLevel::Disabled;
            }
            file_path => {
                self.compilation.logger.file = Some(file_path.into());
                self.profiling.logger.file = Some(file_path.into());
            }
        }

        self
    }

    /// Apply a `TILEPLAN_DEBUG_OPTION` value.
    pub fn with_debug_option(mut self, val: &str) -> Self {
        match val {
            "debug" => {
                self.compilation.logger.level = CompilationLogLevel::Full;
                self.profiling.logger.level = ProfilingLogLevel::Basic;
            }
            "debug-full" => {
                self.compilation.logger.level = CompilationLogLevel::Full;
                self.profiling.logger.level = ProfilingLogLevel::Full;
            }
            "profile" => {
                self.profiling.logger.level = ProfilingLogLevel::Basic;
            }
            "profile-full" => {
                self.profiling.logger.level = ProfilingLogLevel::Full;
            }
            "no-verify" => {
                self.plan.verify_graph = false;
            }
            _ => {}
        }

        self
    }

    /// Parse a configuration from the content of a TOML file.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    // Traverses up the directory tree until a `tileplan.toml` is found or the root is reached.
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            let path = dir.join("tileplan.toml");
            if path.is_file() {
                match Self::from_file_path(&path) {
                    Ok(config) => return config,
                    Err(err) => {
                        log::warn!("Ignoring {}: {err}", path.display());
                        return Self::default();
                    }
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    fn from_file_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = GlobalConfig::from_toml("").unwrap();

        assert!(config.plan.verify_graph);
        assert_eq!(config.plan.tolerance, 1e-2);
        assert_eq!(
            config.profiling.logger.level,
            ProfilingLogLevel::Disabled
        );
    }

    #[test]
    fn sections_are_parsed() {
        let config = GlobalConfig::from_toml(
            r#"
            [plan]
            verify_graph = false
            tolerance = 0.5

            [compilation.logger]
            level = "full"
            stdout = true

            [profiling.logger]
            level = "basic"
            log = "debug"
            "#,
        )
        .unwrap();

        assert!(!config.plan.verify_graph);
        assert_eq!(config.plan.tolerance, 0.5);
        assert!(config.compilation.logger.stdout);
        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Full
        ));
        assert_eq!(config.profiling.logger.level, ProfilingLogLevel::Basic);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let result = GlobalConfig::from_toml("[plan]\nverify_graph = 3");

        assert!(matches!(result, Err(ConfigError::Format(_))));
    }

    #[test]
    fn debug_log_values() {
        let config = GlobalConfig::default().with_debug_log("stderr");
        assert!(config.compilation.logger.stderr);
        assert!(!config.compilation.logger.stdout);

        let config = GlobalConfig::default().with_debug_log("/tmp/plan.log");
        assert_eq!(
            config.profiling.logger.file.as_deref(),
            Some(std::path::Path::new("/tmp/plan.log"))
        );

        let config = GlobalConfig::default().with_debug_log("0");
        assert_eq!(config.profiling.logger.level, ProfilingLogLevel::Disabled);
    }

    #[test]
    fn debug_options() {
        let config = GlobalConfig::default().with_debug_option("profile-full");
        assert_eq!(config.profiling.logger.level, ProfilingLogLevel::Full);

        let config = GlobalConfig::default().with_debug_option("no-verify");
        assert!(!config.plan.verify_graph);
    }
}
