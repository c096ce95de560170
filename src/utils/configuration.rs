use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::assembly::{OrchestratorSettings, Recipe};
use crate::core::DEFAULT_BYTES_TO_SAMPLE;
use crate::pipeline::PipelineOptions;

const ENV_PREFIX: &str = "ASM_FORGE";
const USER_CONFIG_DIR: &str = "asm-forge";
pub const LOG_FILE_NAME: &str = "asm_forge.log";

/// Configuration for an assembly run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfiguration {
    /// Output layout and resources
    pub general: GeneralConfig,
    /// Read intake
    pub reads: ReadsConfig,
    /// Assembly and post-assembly steps
    pub assembly: AssemblyConfig,
    /// Polishing iterations and tools
    pub polishing: PolishingConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Base of the `<output_dir>_work` working directory
    pub output_dir: PathBuf,
    /// Prefix for every saved artifact
    pub prefix: String,
    pub threads: usize,
    pub memory_gb: usize,
    /// Directories searched for external tools before `PATH`
    pub path_prefix: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadsConfig {
    /// Bytes read from the start of a file when sampling it
    pub bytes_to_sample: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub recipe: Recipe,
    /// Genome size estimate handed to the long-read assembler, e.g. `5m`
    pub genome_size: String,
    pub min_contig_length: usize,
    pub min_contig_coverage: f64,
    pub trusted_contigs: Option<PathBuf>,
    pub untrusted_contigs: Option<PathBuf>,
    /// Trim short reads before assembly
    pub trim: bool,
    /// Run Quast on the final contigs
    pub quast: bool,
    /// Render the assembly graph with Bandage
    pub bandage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolishingConfig {
    pub racon_iterations: usize,
    pub pilon_iterations: usize,
    /// Pilon jar, or an executable wrapper
    pub pilon_jar: Option<PathBuf>,
    pub pilon_memory_gb: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Console format (pretty, compact, json)
    pub format: String,
    /// Log file; defaults to the run's details directory
    pub file: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Input/Output error: {message}")]
    IOError { message: String },

    #[error("Validation error: {field} is invalid: {reason}")]
    ValidationError { field: String, reason: String },
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::ConfigurationError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IOError {
            message: err.to_string(),
        }
    }
}

/// Configuration manager with validation and environment integration
pub struct ConfigurationManager {
    config: PipelineConfiguration,
    config_path: Option<PathBuf>,
    environment_prefix: String,
}

impl ConfigurationManager {
    /// Built-in defaults only
    pub fn new_with_defaults() -> Result<Self, PipelineError> {
        let manager = Self {
            config: PipelineConfiguration::default(),
            config_path: None,
            environment_prefix: ENV_PREFIX.to_string(),
        };
        manager.validate_configuration()?;
        Ok(manager)
    }

    /// Layer defaults, the user config, an optional explicit file and the
    /// environment (`ASM_FORGE__SECTION__KEY`).
    ///
    /// An explicit file that cannot be read or parsed is an error; problems
    /// with the implicit sources fall back to the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        let defaults = PipelineConfiguration::default();
        let defaults_toml = toml::to_string(&defaults).map_err(|e| PipelineError::ConfigurationError {
            message: format!("Failed to serialize default configuration: {e}"),
        })?;

        let mut config_builder =
            Config::builder().add_source(File::from_str(&defaults_toml, FileFormat::Toml));

        // User config
        if let Some(home_dir) = dirs::home_dir() {
            let user_config = home_dir.join(".config").join(USER_CONFIG_DIR).join("config.toml");
            config_builder = config_builder.add_source(File::from(user_config).required(false));
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(PipelineError::ConfigurationError {
                    message: format!("Config file {} not found", path.display()),
                });
            }
            config_builder = config_builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("general.path_prefix"),
        );

        let config: PipelineConfiguration = match config_builder.build().and_then(|c| c.try_deserialize()) {
            Ok(config) => config,
            Err(e) if explicit.is_some() => return Err(e.into()),
            Err(e) => {
                warn!("Failed to load configuration: {}, using built-in defaults", e);
                defaults
            }
        };

        let manager = Self {
            config,
            config_path: explicit.map(Path::to_path_buf),
            environment_prefix: ENV_PREFIX.to_string(),
        };
        manager.validate_configuration()?;
        Ok(manager)
    }

    /// Read a single TOML file without layering
    pub fn load_config_from_file(path: &Path) -> Result<PipelineConfiguration, PipelineError> {
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn validate_configuration(&self) -> Result<(), PipelineError> {
        info!("🔍 Validating configuration...");
        let config = &self.config;

        if config.general.threads == 0 {
            return Err(PipelineError::ValidationError {
                field: "general.threads".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let available_threads = num_cpus::get();
        if config.general.threads > available_threads * 2 {
            warn!(
                "Configured threads ({}) exceeds available cores ({})",
                config.general.threads, available_threads
            );
        }

        if config.general.memory_gb == 0 {
            return Err(PipelineError::ValidationError {
                field: "general.memory_gb".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let coverage = config.assembly.min_contig_coverage;
        if coverage.is_nan() || coverage < 0.0 {
            return Err(PipelineError::ValidationError {
                field: "assembly.min_contig_coverage".to_string(),
                reason: "must be zero or positive".to_string(),
            });
        }

        if config.reads.bytes_to_sample < 64 {
            return Err(PipelineError::ValidationError {
                field: "reads.bytes_to_sample".to_string(),
                reason: "must be at least 64".to_string(),
            });
        }

        if !matches!(config.logging.format.as_str(), "pretty" | "compact" | "json") {
            warn!("Unknown log format {:?}, using pretty", config.logging.format);
        }

        info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Install the global subscriber: console output in the configured format
    /// plus a plain-text log file. Keep the returned guard alive until exit so
    /// buffered file output is flushed.
    pub fn setup_logging(&self, log_file: Option<&Path>) -> Result<Option<WorkerGuard>, PipelineError> {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if tracing::dispatcher::has_been_set() {
            info!("⏭️  Logging already initialized, skipping setup");
            return Ok(None);
        }

        let level = &self.config.logging.level;
        let format = &self.config.logging.format;
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let file_path = self.config.logging.file.as_deref().or(log_file);
        let (file_layer, guard) = match file_path {
            Some(path) => {
                let file_appender = tracing_appender::rolling::never(
                    path.parent().unwrap_or(Path::new(".")),
                    path.file_name().unwrap_or(OsStr::new(LOG_FILE_NAME)),
                );
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                let layer = fmt::layer().with_ansi(false).with_writer(non_blocking);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry().with(env_filter).with(file_layer);
        let installed = match format.as_str() {
            "json" => subscriber
                .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                .try_init(),
            "compact" => subscriber.with(fmt::layer().compact()).try_init(),
            // "pretty" or default, without timestamps for cleaner console output
            _ => subscriber
                .with(fmt::layer().without_time().with_target(false))
                .try_init(),
        };
        installed.map_err(|e| PipelineError::ConfigurationError {
            message: format!("Failed to initialize logging: {e}"),
        })?;

        info!("📝 Logging initialized with level: {}, format: {}", level, format);
        Ok(guard)
    }

    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfiguration {
        &mut self.config
    }

    /// Explicit config file this manager was loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn environment_prefix(&self) -> &str {
        &self.environment_prefix
    }

    pub fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        let toml_string = toml::to_string_pretty(&self.config).map_err(|e| {
            PipelineError::ConfigurationError {
                message: format!("Failed to serialize configuration: {e}"),
            }
        })?;

        std::fs::write(path.as_ref(), toml_string).map_err(|e| PipelineError::IOError {
            message: format!("Failed to write configuration file: {e}"),
        })?;

        info!("💾 Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}

/// Anchor a user-supplied path to the launch directory. External tools run
/// with the work directory as their cwd, so relative paths must not reach them.
fn from_launch_dir(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    }
}

impl PipelineConfiguration {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            recipe: self.assembly.recipe,
            genome_size: self.assembly.genome_size.clone(),
            min_contig_length: self.assembly.min_contig_length,
            min_contig_coverage: self.assembly.min_contig_coverage,
            trusted_contigs: self.assembly.trusted_contigs.as_deref().map(from_launch_dir),
            untrusted_contigs: self.assembly.untrusted_contigs.as_deref().map(from_launch_dir),
            racon_iterations: self.polishing.racon_iterations,
            pilon_iterations: self.polishing.pilon_iterations,
            pilon_jar: self.polishing.pilon_jar.as_deref().map(from_launch_dir),
            pilon_memory_gb: self.polishing.pilon_memory_gb,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            output_dir: self.general.output_dir.clone(),
            prefix: self.general.prefix.clone(),
            threads: self.general.threads,
            memory_gb: self.general.memory_gb,
            bytes_to_sample: self.reads.bytes_to_sample,
            trim: self.assembly.trim,
            quast: self.assembly.quast,
            bandage: self.assembly.bandage,
            assembly: self.orchestrator_settings(),
            log_file: self.logging.file.clone(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("p3_assembly"),
            prefix: String::new(),
            threads: 4,
            memory_gb: 250,
            path_prefix: Vec::new(),
        }
    }
}

impl Default for ReadsConfig {
    fn default() -> Self {
        Self {
            bytes_to_sample: DEFAULT_BYTES_TO_SAMPLE,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            recipe: Recipe::Auto,
            genome_size: "5m".to_string(),
            min_contig_length: 300,
            min_contig_coverage: 5.0,
            trusted_contigs: None,
            untrusted_contigs: None,
            trim: false,
            quast: false,
            bandage: false,
        }
    }
}

impl Default for PolishingConfig {
    fn default() -> Self {
        Self {
            racon_iterations: 2,
            pilon_iterations: 2,
            pilon_jar: None,
            pilon_memory_gb: 32,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}
