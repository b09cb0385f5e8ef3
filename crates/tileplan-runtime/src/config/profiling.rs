use super::logger::{LogLevel, LoggerConfig};

/// Logging of kernel execution times.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProfilingConfig {
    #[serde(default)]
    pub logger: LoggerConfig<ProfilingLogLevel>,
}

/// How much is reported for each execution.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProfilingLogLevel {
    /// Nothing is logged.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Kernel name and duration.
    #[serde(rename = "basic")]
    Basic,

    /// Also the launch geometry and the number of executed nodes.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for ProfilingLogLevel {}
