//! Tests for the pipeline-utils-cli library module.

use super::*;
use pipeline_utils_core::adapters::{InMemoryBlobService, InMemoryDatabase};
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

const CONFIG_YAML: &str = r#"
key_vault:
  url: "https://etl-dev-kv.vault.azure.net/"
storage:
  account_url: "https://etldevstorage.blob.core.windows.net"
  container_name: "raw"
  access_key_secret_name: "storage-account-key"
"#;

struct Workspace {
    _dir: TempDir,
    config_dir: PathBuf,
    blob_dir: PathBuf,
    root: PathBuf,
}

fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let config_dir = root.join("config");
    let blob_dir = root.join("blobs");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(blob_dir.join("etldevstorage").join("raw")).unwrap();
    fs::write(config_dir.join("development.yaml"), CONFIG_YAML).unwrap();
    Workspace {
        _dir: dir,
        config_dir,
        blob_dir,
        root,
    }
}

fn parse(ws: &Workspace, args: &[&str]) -> Cli {
    let mut argv = vec![
        "pipeline-utils".to_string(),
        "--config-dir".to_string(),
        ws.config_dir.display().to_string(),
        "--local-dir".to_string(),
        ws.blob_dir.display().to_string(),
    ];
    argv.extend(args.iter().map(|a| a.to_string()));
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn test_cli_parsing() {
    let cli = Cli::try_parse_from([
        "pipeline-utils",
        "--env",
        "prod",
        "query",
        "SELECT * FROM products WHERE id = ?",
        "-p",
        "2",
    ])
    .unwrap();

    assert_eq!(cli.env, Environment::Production);
    match cli.command {
        Commands::Query {
            params, separator, ..
        } => {
            assert_eq!(params, vec!["2".to_string()]);
            assert_eq!(separator, ',');
        }
        _ => panic!("Expected Query command"),
    }
}

#[test]
fn test_unknown_environment_is_rejected() {
    let result = Cli::try_parse_from(["pipeline-utils", "--env", "qa", "config", "validate"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_param_types() {
    assert_eq!(parse_param("2"), CellValue::Int(2));
    assert_eq!(parse_param("2.5"), CellValue::Float(2.5));
    assert_eq!(parse_param("TRUE"), CellValue::Bool(true));
    assert_eq!(parse_param("null"), CellValue::Null);
    assert_eq!(parse_param("alpha"), CellValue::from("alpha"));
}

#[test]
fn test_exit_codes_follow_error_kind() {
    let not_found = CliError::from(BlobStorageError::BlobNotFound {
        container: "raw".to_string(),
        blob: "missing.csv".to_string(),
    });
    assert_eq!(not_found.exit_code(), 3);

    let timeout = CliError::from(DatabaseError::Timeout { timeout_seconds: 30 });
    assert_eq!(timeout.exit_code(), 6);

    let disabled = CliError::FeatureDisabled {
        feature: "cloud".to_string(),
        message: String::new(),
    };
    assert_eq!(disabled.exit_code(), 2);
}

#[tokio::test]
#[serial]
async fn test_missing_environment_config_fails() {
    let ws = workspace();
    let cli = Cli::try_parse_from([
        "pipeline-utils",
        "--env",
        "staging",
        "--config-dir",
        ws.config_dir.to_str().unwrap(),
        "config",
        "validate",
    ])
    .unwrap();

    let err = run(cli).await.unwrap_err();
    assert!(matches!(
        err,
        CliError::Configuration(ConfigError::EnvironmentNotFound { .. })
    ));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
#[serial]
async fn test_local_blob_upload_then_download() {
    let ws = workspace();
    let source = ws.root.join("input.bin");
    let target = ws.root.join("output.bin");
    fs::write(&source, b"sales,2024\n").unwrap();

    run(parse(
        &ws,
        &["blob", "upload", source.to_str().unwrap(), "--blob", "In/sales.csv"],
    ))
    .await
    .unwrap();

    run(parse(
        &ws,
        &["blob", "download", "In/sales.csv", "--output", target.to_str().unwrap()],
    ))
    .await
    .unwrap();

    assert_eq!(fs::read(&target).unwrap(), b"sales,2024\n");
}

#[tokio::test]
#[serial]
async fn test_local_table_upload_rewrites_separator() {
    let ws = workspace();
    let source = ws.root.join("products.csv");
    fs::write(&source, "id;name\n1;alpha\n2;beta\n").unwrap();

    run(parse(
        &ws,
        &[
            "table",
            "upload",
            source.to_str().unwrap(),
            "--blob",
            "products.csv",
            "--input-separator",
            ";",
        ],
    ))
    .await
    .unwrap();

    let stored = fs::read_to_string(
        ws.blob_dir
            .join("etldevstorage")
            .join("raw")
            .join("products.csv"),
    )
    .unwrap();
    assert_eq!(stored, "id,name\n1,alpha\n2,beta\n");
}

#[tokio::test]
#[serial]
async fn test_query_without_cloud_backend_is_feature_error() {
    let ws = workspace();

    let err = run(parse(&ws, &["query", "SELECT 1"])).await.unwrap_err();
    assert!(matches!(err, CliError::FeatureDisabled { .. }));
}

#[test]
fn test_connection_settings_use_configured_driver() {
    let database: DatabaseSettings = serde_yaml::from_str(
        r#"
server: "etl-sql"
database: "etl"
username: "loader"
password_secret_name: "sql-loader-password"
driver: "ODBC Driver 18 for SQL Server"
"#,
    )
    .unwrap();

    let settings = connection_settings(&database, SecretValue::from_string("pw".to_string()));

    assert_eq!(settings.driver, "ODBC Driver 18 for SQL Server");
    assert!(settings
        .odbc_connection_string()
        .expose_secret()
        .starts_with("Driver={ODBC Driver 18 for SQL Server};"));
}

#[tokio::test]
#[serial]
async fn test_engine_honors_configured_driver() {
    let ws = workspace();
    let yaml = format!(
        "{}database:\n  server: \"etl-sql\"\n  database: \"etl\"\n  username: \"loader\"\n  password_secret_name: \"sql-loader-password\"\n  driver: \"ODBC Driver 18 for SQL Server\"\n",
        CONFIG_YAML
    );
    fs::write(ws.config_dir.join("development.yaml"), yaml).unwrap();
    let config = PipelineConfig::load(Environment::Development, &ws.config_dir).unwrap();

    let store = InMemorySecretStore::new(config.key_vault.url.clone());
    store.add_secret(
        SecretName::new("sql-loader-password").unwrap(),
        SecretValue::from_string("pw".to_string()),
    );
    let secrets: Arc<dyn SecretStore> = Arc::new(store);
    let services = Services {
        secrets: Arc::clone(&secrets),
        transfer: BlobTransfer::new(secrets, Arc::new(InMemoryBlobService::new())),
        sql: Some(Arc::new(InMemoryDatabase::new())),
    };

    let engine = services.engine(&config).await.unwrap();
    assert_eq!(engine.settings().driver, "ODBC Driver 18 for SQL Server");
}

#[test]
fn test_logging_initialization_is_repeatable() {
    initialize_logging(Some("debug"), false);
    initialize_logging(Some("info"), true);
}
