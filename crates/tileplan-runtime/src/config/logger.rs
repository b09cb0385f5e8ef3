use super::{
    GlobalConfig, compilation::CompilationLogLevel, profiling::ProfilingLogLevel,
};
use alloc::{string::ToString, sync::Arc, vec::Vec};
use core::fmt::Display;
use hashbrown::HashMap;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Configuration of one log channel, parameterized by its level type.
///
/// Note that you can use multiple outputs at the same time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional forwarding to the `log` crate at the given level.
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this channel.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

/// Log levels using the `log` crate.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    #[default]
    #[serde(rename = "info")]
    Info,

    #[serde(rename = "debug")]
    Debug,

    #[serde(rename = "trace")]
    Trace,
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in `LoggerConfig`.
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Binary log level for enabling or disabling logging.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryLogLevel {
    /// Logging is disabled.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Logging is fully enabled.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for BinaryLogLevel {}

/// Fans compilation and profiling messages out to the configured outputs.
#[derive(Debug)]
pub struct Logger {
    loggers: Vec<LoggerKind>,
    compilation_index: Vec<usize>,
    profiling_index: Vec<usize>,
    /// Configuration the outputs were created from.
    pub config: Arc<GlobalConfig>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Hash, PartialEq, Eq)]
enum LoggerId {
    File(PathBuf),
    Stdout,
    Stderr,
    LogCrate(LogCrateLevel),
}

struct Registry {
    loggers: Vec<LoggerKind>,
    logger2index: HashMap<LoggerId, usize>,
}

impl Registry {
    fn register(&mut self, id: LoggerId, setting_index: &mut Vec<usize>) {
        if let Some(index) = self.logger2index.get(&id) {
            setting_index.push(*index);
            return;
        }

        let logger = match &id {
            LoggerId::File(path) => match FileLogger::new(path, true) {
                Ok(logger) => LoggerKind::File(logger),
                Err(err) => {
                    log::warn!("Can't open log file {}: {err}", path.display());
                    return;
                }
            },
            LoggerId::Stdout => LoggerKind::Stdout,
            LoggerId::Stderr => LoggerKind::Stderr,
            LoggerId::LogCrate(level) => LoggerKind::Log(*level),
        };

        let index = self.loggers.len();
        self.logger2index.insert(id, index);
        self.loggers.push(logger);
        setting_index.push(index);
    }

    fn register_config<L: LogLevel>(&mut self, kind: &LoggerConfig<L>, index: &mut Vec<usize>) {
        if let Some(file) = &kind.file {
            if !kind.append {
                // Truncate once, later writers append.
                if let Err(err) = File::create(file) {
                    log::warn!("Can't truncate log file {}: {err}", file.display());
                }
            }
            self.register(LoggerId::File(file.clone()), index);
        }
        if kind.stdout {
            self.register(LoggerId::Stdout, index);
        }
        if kind.stderr {
            self.register(LoggerId::Stderr, index);
        }
        if let Some(level) = kind.log {
            self.register(LoggerId::LogCrate(level), index);
        }
    }
}

impl Logger {
    /// Creates a new `Logger` from the global configuration.
    ///
    /// Note that creating a logger is quite expensive.
    pub fn new() -> Self {
        Self::from_config(GlobalConfig::get())
    }

    /// Creates a new `Logger` from an explicit configuration.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let mut registry = Registry {
            loggers: Vec::new(),
            logger2index: HashMap::new(),
        };
        let mut compilation_index = Vec::new();
        let mut profiling_index = Vec::new();

        if config.compilation.logger.level != CompilationLogLevel::Disabled {
            registry.register_config(&config.compilation.logger, &mut compilation_index);
        }
        if config.profiling.logger.level != ProfilingLogLevel::Disabled {
            registry.register_config(&config.profiling.logger, &mut profiling_index);
        }

        Self {
            loggers: registry.loggers,
            compilation_index,
            profiling_index,
            config,
        }
    }

    /// Logs a message for compilation, directing it to all configured compilation loggers.
    pub fn log_compilation<S: Display>(&mut self, msg: &S) {
        Self::dispatch(&mut self.loggers, &self.compilation_index, msg);
    }

    /// Logs a message for profiling, directing it to all configured profiling loggers.
    pub fn log_profiling<S: Display>(&mut self, msg: &S) {
        Self::dispatch(&mut self.loggers, &self.profiling_index, msg);
    }

    /// Returns the current compilation log level.
    pub fn log_level_compilation(&self) -> CompilationLogLevel {
        self.config.compilation.logger.level
    }

    /// Returns the current profiling log level.
    pub fn log_level_profiling(&self) -> ProfilingLogLevel {
        self.config.profiling.logger.level
    }

    fn dispatch<S: Display>(loggers: &mut [LoggerKind], indices: &[usize], msg: &S) {
        if indices.len() > 1 {
            let msg = msg.to_string();
            for index in indices {
                loggers[*index].log(&msg);
            }
        } else if let Some(index) = indices.first() {
            loggers[*index].log(msg);
        }
    }
}

#[derive(Debug)]
enum LoggerKind {
    File(FileLogger),
    Stdout,
    Stderr,
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

#[derive(Debug)]
struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    fn new(path: &PathBuf, append: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .create(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn log<S: Display>(&mut self, msg: &S) {
        let written = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());
        if let Err(err) = written {
            log::warn!("Failed to write log entry: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_outputs_are_registered_once() {
        let config = GlobalConfig::default().with_debug_log("stdout");
        let logger = Logger::from_config(Arc::new(config));

        assert_eq!(logger.loggers.len(), 1);
        assert_eq!(logger.compilation_index, vec![0]);
        assert_eq!(logger.profiling_index, vec![0]);
    }

    #[test]
    fn disabled_channels_have_no_output() {
        let logger = Logger::from_config(Arc::new(GlobalConfig::default()));

        assert!(logger.loggers.is_empty());
        assert_eq!(logger.log_level_compilation(), CompilationLogLevel::Disabled);
    }

    #[test]
    fn file_output_receives_messages() {
        let path = std::env::temp_dir().join(format!(
            "tileplan-logger-{}.log",
            rand::random::<u64>()
        ));
        let config = GlobalConfig::default().with_debug_log(path.to_str().unwrap());
        let mut logger = Logger::from_config(Arc::new(config));

        logger.log_compilation(&"kernel matmul");
        logger.log_profiling(&"matmul took 1ms");

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(content, "kernel matmul\nmatmul took 1ms\n");
    }
}
