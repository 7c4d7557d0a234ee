//! # Pipeline Utils CLI
//!
//! Operator command-line interface over the pipeline helpers.
//!
//! This module provides commands for:
//! - Showing and validating per-environment configuration
//! - Reading secrets from Key Vault
//! - Downloading and uploading blobs and delimited tables
//! - Running parameterized queries and writing process-log rows
//!
//! Azure and SQL Server backends need the `cloud` feature. `--local-dir`
//! swaps blob storage for a directory tree, which needs no Azure access.

use clap::{Parser, Subcommand};
use pipeline_utils_core::adapters::{FilesystemBlobService, InMemorySecretCache, InMemorySecretStore};
use pipeline_utils_core::blob_storage::BlobServiceConnector;
use pipeline_utils_core::database::SqlConnector;
use pipeline_utils_core::settings::{DatabaseSettings, DEFAULT_CONFIG_DIR};
use pipeline_utils_core::{
    BlobName, BlobStorageError, BlobTransfer, BlobUrl, CellValue, ConfigError, ConnectionSettings,
    ContainerName, DatabaseError, Environment, ErrorKind, KeyVaultError, PipelineConfig,
    PipelineError, ProcedureName, ProcessLogRecord, SecretName, SecretStore, SecretValue,
    SqlEngine, Table, TableError, TransferSummary, DEFAULT_SEPARATOR,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Account key handed to the filesystem backend; it only checks presence
const LOCAL_ACCESS_KEY: &str = "local-development-key";

// ============================================================================
// CLI Structure
// ============================================================================

/// Pipeline Utils CLI - Key Vault, Blob Storage and Azure SQL helpers
#[derive(Parser, Debug)]
#[command(name = "pipeline-utils")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Move data between Key Vault, Blob Storage and Azure SQL")]
pub struct Cli {
    /// Environment whose configuration is loaded
    #[arg(short, long, env = "PIPELINE_ENV", default_value = "development")]
    pub env: Environment,

    /// Directory holding `<environment>.yaml`
    #[arg(short, long, env = "PIPELINE_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Logging level; overrides the configured level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Serve blobs from this directory instead of Azure Storage
    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Key Vault commands
    Secret {
        #[command(subcommand)]
        action: SecretCommands,
    },

    /// Blob transfer commands
    Blob {
        #[command(subcommand)]
        action: BlobCommands,
    },

    /// Delimited table commands
    Table {
        #[command(subcommand)]
        action: TableCommands,
    },

    /// Run a query and print the result as delimited text
    Query {
        /// SQL text with positional `?` markers
        sql: String,

        /// Parameter values, in marker order
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output column separator
        #[arg(short, long, default_value_t = DEFAULT_SEPARATOR)]
        separator: char,
    },

    /// Write one process-log row through the logging procedure
    LogProcess {
        /// JSON file holding the process log record
        #[arg(short, long)]
        record: PathBuf,

        /// Procedure to call; defaults to `database.log_procedure`
        #[arg(short, long)]
        procedure: Option<String>,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show {
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Load and validate the configuration
    Validate,
}

/// Secret subcommands
#[derive(Subcommand, Debug)]
pub enum SecretCommands {
    /// Fetch a secret from the configured vault
    Get {
        name: String,

        /// Print the value instead of its length
        #[arg(long)]
        reveal: bool,
    },
}

/// Blob subcommands
#[derive(Subcommand, Debug)]
pub enum BlobCommands {
    /// Download a blob to a local file
    Download {
        /// Blob name inside the container
        blob: String,

        /// Local file to create or overwrite
        #[arg(short, long)]
        output: PathBuf,

        /// Container; defaults to `storage.container_name`
        #[arg(long)]
        container: Option<String>,
    },

    /// Upload a local file, replacing any existing blob
    Upload {
        /// Local file to upload
        file: PathBuf,

        /// Blob name inside the container
        #[arg(short, long)]
        blob: String,

        /// Container; defaults to `storage.container_name`
        #[arg(long)]
        container: Option<String>,
    },
}

/// Table subcommands
#[derive(Subcommand, Debug)]
pub enum TableCommands {
    /// Read a delimited file and upload it as a table
    Upload {
        /// Local delimited file with a header row
        file: PathBuf,

        /// Blob name inside the container
        #[arg(short, long)]
        blob: String,

        /// Container; defaults to `storage.container_name`
        #[arg(long)]
        container: Option<String>,

        /// Separator of the local file
        #[arg(long, default_value_t = DEFAULT_SEPARATOR)]
        input_separator: char,

        /// Separator written to the blob
        #[arg(short, long, default_value_t = DEFAULT_SEPARATOR)]
        separator: char,
    },
}

/// Configuration output formats
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Command requires the '{feature}' backend: {message}")]
    FeatureDisabled { feature: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::InvalidArgument { .. } | Self::FeatureDisabled { .. } => 2,
            Self::Io(_) => 5,
            Self::Pipeline(e) => match e.kind() {
                ErrorKind::Configuration => 1,
                ErrorKind::NotFound => 3,
                ErrorKind::Authorization => 4,
                ErrorKind::Io => 5,
                ErrorKind::Timeout => 6,
                ErrorKind::Driver => 7,
                ErrorKind::Internal => 8,
            },
        }
    }

    fn invalid(arg: &str, message: impl ToString) -> Self {
        Self::InvalidArgument {
            arg: arg.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<KeyVaultError> for CliError {
    fn from(e: KeyVaultError) -> Self {
        Self::Pipeline(e.into())
    }
}

impl From<BlobStorageError> for CliError {
    fn from(e: BlobStorageError) -> Self {
        Self::Pipeline(e.into())
    }
}

impl From<TableError> for CliError {
    fn from(e: TableError) -> Self {
        Self::Pipeline(e.into())
    }
}

impl From<DatabaseError> for CliError {
    fn from(e: DatabaseError) -> Self {
        Self::Pipeline(e.into())
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    run(Cli::parse()).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    // Logging comes up before the load result is inspected so load failures
    // are reported through it.
    let loaded = PipelineConfig::load(cli.env, &cli.config_dir);
    let configured_level = loaded.as_ref().map(|c| c.logging.level.clone()).ok();
    let configured_json = loaded.as_ref().map(|c| c.logging.json).unwrap_or(false);
    initialize_logging(
        cli.log_level.as_deref().or(configured_level.as_deref()),
        cli.json_logs || configured_json,
    );

    let config = loaded?;

    match cli.command {
        Commands::Config { action } => execute_config_command(action, &config),
        Commands::Secret { action } => {
            let services = Services::build(&config, cli.local_dir.as_deref()).await?;
            execute_secret_command(action, &services).await
        }
        Commands::Blob { action } => {
            let services = Services::build(&config, cli.local_dir.as_deref()).await?;
            execute_blob_command(action, &services, &config).await
        }
        Commands::Table { action } => {
            let services = Services::build(&config, cli.local_dir.as_deref()).await?;
            execute_table_command(action, &services, &config).await
        }
        Commands::Query {
            sql,
            params,
            output,
            separator,
        } => {
            let services = Services::build(&config, cli.local_dir.as_deref()).await?;
            let engine = services.engine(&config).await?;
            let params: Vec<CellValue> = params.iter().map(|p| parse_param(p)).collect();
            let table = engine.query_to_table(&sql, &params).await?;
            let text = table.to_delimited(separator)?;
            match output {
                Some(path) => tokio::fs::write(&path, text).await?,
                None => print!("{}", text),
            }
            info!(rows = table.len(), "Query complete");
            Ok(())
        }
        Commands::LogProcess { record, procedure } => {
            let services = Services::build(&config, cli.local_dir.as_deref()).await?;
            execute_log_process_command(&record, procedure, &services, &config).await
        }
    }
}

/// Initialize logging; `RUST_LOG` wins over `level`
fn initialize_logging(level: Option<&str>, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.unwrap_or("info").into());

    // try_init fails only when a subscriber is already installed in this process
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

// ============================================================================
// Services
// ============================================================================

/// Backends resolved for one invocation
pub struct Services {
    secrets: Arc<dyn SecretStore>,
    transfer: BlobTransfer,
    sql: Option<Arc<dyn SqlConnector>>,
}

impl Services {
    /// Build the secret store, blob transfer and SQL connector for `config`
    ///
    /// With `local_dir` the blob backend is a directory tree and the configured
    /// access-key secret resolves to a fixed development value.
    pub async fn build(config: &PipelineConfig, local_dir: Option<&Path>) -> Result<Self, CliError> {
        let backends = match local_dir {
            Some(dir) => {
                let store = InMemorySecretStore::new(config.key_vault.url.clone());
                store.add_secret(
                    config.storage.access_key_secret_name.clone(),
                    SecretValue::from_string(LOCAL_ACCESS_KEY.to_string()),
                );
                let blobs = FilesystemBlobService::new(dir.to_path_buf()).await?;
                info!(local_dir = %dir.display(), "Using filesystem blob backend");
                Backends {
                    secrets: Arc::new(store),
                    blobs: Arc::new(blobs),
                    sql: None,
                }
            }
            None => cloud_backends(config)?,
        };

        let mut transfer = BlobTransfer::new(Arc::clone(&backends.secrets), backends.blobs);
        if config.storage.cache_access_keys {
            transfer = transfer.with_access_key_cache(
                Arc::new(InMemorySecretCache::new()),
                config.storage.cache_ttl(),
            );
        }

        Ok(Self {
            secrets: backends.secrets,
            transfer,
            sql: backends.sql,
        })
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    pub fn transfer(&self) -> &BlobTransfer {
        &self.transfer
    }

    /// Engine for the configured database, password read from the vault
    pub async fn engine(&self, config: &PipelineConfig) -> Result<SqlEngine, CliError> {
        let connector = self.sql.clone().ok_or_else(|| CliError::FeatureDisabled {
            feature: "cloud".to_string(),
            message: "SQL commands are unavailable with --local-dir".to_string(),
        })?;
        let database = config
            .database
            .as_ref()
            .ok_or_else(|| CliError::invalid("database", "no database section configured"))?;

        let password = self.secrets.get_secret(&database.password_secret_name).await?;
        let engine = SqlEngine::new(connection_settings(database, password), connector)?;
        Ok(engine)
    }
}

/// Connection settings for the configured database, honoring its driver
pub fn connection_settings(database: &DatabaseSettings, password: SecretValue) -> ConnectionSettings {
    ConnectionSettings::new(
        &database.database,
        &database.server,
        &database.username,
        password,
    )
    .with_driver(&database.driver)
}

/// Secret, blob and SQL backends before they are wired together
struct Backends {
    secrets: Arc<dyn SecretStore>,
    blobs: Arc<dyn BlobServiceConnector>,
    sql: Option<Arc<dyn SqlConnector>>,
}

#[cfg(feature = "cloud")]
fn cloud_backends(config: &PipelineConfig) -> Result<Backends, CliError> {
    use pipeline_utils_core::adapters::{AzureBlobServiceConnector, AzureKeyVault, MssqlConnector};
    use pipeline_utils_core::azure::get_credential_for;
    use pipeline_utils_core::RuntimeEnvironment;

    let credential = get_credential_for(
        &RuntimeEnvironment::detect(),
        &config.credential.dev_vm_marker,
    )?;
    let vault = AzureKeyVault::new(&config.key_vault.url, credential.token_credential())?
        .with_request_timeout(config.key_vault.request_timeout());

    Ok(Backends {
        secrets: Arc::new(vault),
        blobs: Arc::new(AzureBlobServiceConnector::new()),
        sql: Some(Arc::new(MssqlConnector::new())),
    })
}

#[cfg(not(feature = "cloud"))]
fn cloud_backends(_config: &PipelineConfig) -> Result<Backends, CliError> {
    Err(CliError::FeatureDisabled {
        feature: "cloud".to_string(),
        message: "rebuild with --features cloud or pass --local-dir".to_string(),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute config command
fn execute_config_command(action: ConfigCommands, config: &PipelineConfig) -> Result<(), CliError> {
    match action {
        ConfigCommands::Show { format } => {
            let rendered = match format {
                ConfigFormat::Yaml => serde_yaml::to_string(config)
                    .map_err(|e| CliError::invalid("format", e))?,
                ConfigFormat::Json => serde_json::to_string_pretty(config)
                    .map_err(|e| CliError::invalid("format", e))?,
            };
            println!("{}", rendered);
        }
        ConfigCommands::Validate => {
            // Loading already validated; reaching here means it passed
            println!("configuration is valid");
        }
    }
    Ok(())
}

/// Execute secret command
async fn execute_secret_command(action: SecretCommands, services: &Services) -> Result<(), CliError> {
    match action {
        SecretCommands::Get { name, reveal } => {
            let name = SecretName::new(name)?;
            let value = services.secrets().get_secret(&name).await?;
            if reveal {
                warn!(secret_name = %name, "Printing secret value");
                println!("{}", value.expose_secret());
            } else {
                println!("{}: {} characters", name, value.len());
            }
        }
    }
    Ok(())
}

/// Execute blob command
async fn execute_blob_command(
    action: BlobCommands,
    services: &Services,
    config: &PipelineConfig,
) -> Result<(), CliError> {
    let storage = &config.storage;
    match action {
        BlobCommands::Download {
            blob,
            output,
            container,
        } => {
            let container = container_or_default(container, config)?;
            let blob = BlobName::new(blob)?;
            let summary = services
                .transfer()
                .download_to_file(
                    &storage.account_url,
                    &container,
                    &storage.access_key_secret_name,
                    &blob,
                    &output,
                )
                .await?;
            print_summary(&summary)
        }
        BlobCommands::Upload {
            file,
            blob,
            container,
        } => {
            let url = blob_url(config, container, blob)?;
            let data = tokio::fs::read(&file).await?;
            let summary = services
                .transfer()
                .upload_object(bytes::Bytes::from(data), &url, &storage.access_key_secret_name)
                .await?;
            print_summary(&summary)
        }
    }
}

/// Execute table command
async fn execute_table_command(
    action: TableCommands,
    services: &Services,
    config: &PipelineConfig,
) -> Result<(), CliError> {
    match action {
        TableCommands::Upload {
            file,
            blob,
            container,
            input_separator,
            separator,
        } => {
            let url = blob_url(config, container, blob)?;
            let data = tokio::fs::read(&file).await?;
            let table = Table::from_delimited(&data, input_separator)?;
            let summary = services
                .transfer()
                .upload_table(
                    &table,
                    &url,
                    &config.storage.access_key_secret_name,
                    separator,
                )
                .await?;
            print_summary(&summary)
        }
    }
}

/// Execute log-process command
async fn execute_log_process_command(
    record: &Path,
    procedure: Option<String>,
    services: &Services,
    config: &PipelineConfig,
) -> Result<(), CliError> {
    let procedure = match procedure {
        Some(name) => ProcedureName::new(name)?,
        None => config
            .database
            .as_ref()
            .and_then(|d| d.log_procedure.clone())
            .ok_or_else(|| {
                CliError::invalid("procedure", "not given and database.log_procedure is unset")
            })?,
    };

    let raw = tokio::fs::read(record).await?;
    let record: ProcessLogRecord =
        serde_json::from_slice(&raw).map_err(|e| CliError::invalid("record", e))?;

    let engine = services.engine(config).await?;
    engine.log_process(&procedure, &record).await?;

    info!(procedure = %procedure.as_str(), process = %record.process_name, "Logged process run");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn container_or_default(
    container: Option<String>,
    config: &PipelineConfig,
) -> Result<ContainerName, CliError> {
    match container {
        Some(name) => Ok(ContainerName::new(name)?),
        None => Ok(config.storage.container_name.clone()),
    }
}

fn blob_url(
    config: &PipelineConfig,
    container: Option<String>,
    blob: String,
) -> Result<BlobUrl, CliError> {
    Ok(BlobUrl::new(
        config.storage.account_url.clone(),
        container_or_default(container, config)?,
        BlobName::new(blob)?,
    ))
}

fn print_summary(summary: &TransferSummary) -> Result<(), CliError> {
    let json = serde_json::to_string(summary).map_err(|e| CliError::invalid("summary", e))?;
    println!("{}", json);
    Ok(())
}

/// Interpret a command-line parameter as the narrowest matching cell type
///
/// `null` (any case) is SQL NULL; anything not numeric or boolean is text.
pub fn parse_param(raw: &str) -> CellValue {
    if raw.eq_ignore_ascii_case("null") {
        CellValue::Null
    } else if let Ok(value) = raw.parse::<i64>() {
        CellValue::Int(value)
    } else if let Ok(value) = raw.parse::<f64>() {
        CellValue::Float(value)
    } else if raw.eq_ignore_ascii_case("true") {
        CellValue::Bool(true)
    } else if raw.eq_ignore_ascii_case("false") {
        CellValue::Bool(false)
    } else {
        CellValue::Text(raw.to_string())
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
