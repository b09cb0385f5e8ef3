use super::logger::{BinaryLogLevel, LoggerConfig};

/// Logging of compiled kernels.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompilationConfig {
    #[serde(default)]
    pub logger: LoggerConfig<CompilationLogLevel>,
}

/// Compilation logs either print the whole kernel or nothing.
pub type CompilationLogLevel = BinaryLogLevel;
