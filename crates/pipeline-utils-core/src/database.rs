//! # Database Access
//!
//! Connection settings for Azure SQL, the engine handle that opens one
//! connection per operation, and query execution into a [`Table`].
//!
//! Engine construction validates the settings and returns any problem to the
//! caller; an engine that exists is always usable as far as local checks can
//! tell. Connecting happens lazily on each operation.

use crate::key_vault::SecretValue;
use crate::table::{CellValue, Table};
use crate::ErrorKind;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Driver used when none is given
pub const DEFAULT_DRIVER: &str = "ODBC Driver 17 for SQL Server";

/// Drivers the connection string can name
pub const SUPPORTED_DRIVERS: [&str; 2] = [
    "ODBC Driver 17 for SQL Server",
    "ODBC Driver 18 for SQL Server",
];

/// Azure SQL TCP port
pub const DEFAULT_PORT: u16 = 1433;

/// Fixed connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffix appended to bare server names
pub const AZURE_SQL_DOMAIN: &str = "database.windows.net";

// ============================================================================
// Connection Settings
// ============================================================================

/// Everything needed to reach one Azure SQL database
#[derive(Clone)]
pub struct ConnectionSettings {
    pub driver: String,
    /// Bare server name (`etl-sql`) or fully qualified host name
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: SecretValue,
    pub port: u16,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    /// Settings with the fixed Azure SQL defaults
    ///
    /// Driver 17, port 1433, encryption required, certificate validated and a
    /// 30 second connect timeout.
    pub fn new(
        database: impl Into<String>,
        server: impl Into<String>,
        username: impl Into<String>,
        password: SecretValue,
    ) -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            server: server.into(),
            database: database.into(),
            username: username.into(),
            password,
            port: DEFAULT_PORT,
            encrypt: true,
            trust_server_certificate: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Use a different ODBC driver name
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Host name to connect to
    ///
    /// Names without a dot get the Azure SQL domain appended.
    pub fn server_fqdn(&self) -> String {
        if self.server.contains('.') {
            self.server.clone()
        } else {
            format!("{}.{}", self.server, AZURE_SQL_DOMAIN)
        }
    }

    /// Check the settings before any connection attempt
    ///
    /// # Errors
    /// - `DatabaseError::UnsupportedDriver` if the driver name is not recognized
    /// - `DatabaseError::InvalidConnectionSettings` for empty fields or a zero timeout
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if !SUPPORTED_DRIVERS.contains(&self.driver.as_str()) {
            return Err(DatabaseError::UnsupportedDriver {
                driver: self.driver.clone(),
            });
        }

        let required = [
            ("server", &self.server),
            ("database", &self.database),
            ("username", &self.username),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DatabaseError::InvalidConnectionSettings {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        if self.server.chars().any(|c| c.is_whitespace() || c == ';') {
            return Err(DatabaseError::InvalidConnectionSettings {
                field: "server".to_string(),
                reason: "must not contain whitespace or ';'".to_string(),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(DatabaseError::InvalidConnectionSettings {
                field: "connect_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// ODBC connection string including the password
    pub fn odbc_connection_string(&self) -> SecretValue {
        SecretValue::from_string(self.render(self.password.expose_secret()))
    }

    fn render(&self, password: &str) -> String {
        format!(
            "Driver={{{}}};Server=tcp:{},{};Database={};Uid={};Pwd={{{}}};Encrypt={};TrustServerCertificate={};Connection Timeout={};",
            self.driver,
            self.server_fqdn(),
            self.port,
            odbc_value(&self.database),
            odbc_value(&self.username),
            password.replace('}', "}}"),
            yes_no(self.encrypt),
            yes_no(self.trust_server_certificate),
            self.connect_timeout.as_secs(),
        )
    }
}

impl fmt::Display for ConnectionSettings {
    /// Connection string with the password masked
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render("***"))
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("driver", &self.driver)
            .field("server", &self.server_fqdn())
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Brace-quote ODBC attribute values that contain special characters
fn odbc_value(value: &str) -> String {
    let needs_quoting = value.contains([';', '{', '}'])
        || value.starts_with(' ')
        || value.ends_with(' ');
    if needs_quoting {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

// ============================================================================
// Placeholders
// ============================================================================

/// Count `?` parameter markers outside literals, quoted identifiers and comments
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan_sql(sql, |_| count += 1);
    count
}

/// Rewrite `?` markers to SQL Server's numbered `@P1..@Pn` form
///
/// Markers inside string literals, quoted identifiers and comments are left
/// untouched.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut last = 0;
    let mut number = 0;
    scan_sql(sql, |offset| {
        number += 1;
        out.push_str(&sql[last..offset]);
        out.push_str(&format!("@P{}", number));
        last = offset + 1;
    });
    out.push_str(&sql[last..]);
    out
}

/// Call `on_marker` with the byte offset of every active `?`
fn scan_sql(sql: &str, mut on_marker: impl FnMut(usize)) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'[' => i = skip_quoted(bytes, i, b']'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b'?' => {
                on_marker(i);
                i += 1;
            }
            _ => i += 1,
        }
    }
}

/// Index just past a quoted run starting at `start`; doubled closers are escapes
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

// ============================================================================
// Connection Traits
// ============================================================================

/// One open database connection
///
/// Work done through `execute` is only durable after `commit`; closing
/// without committing discards it.
#[async_trait]
pub trait SqlConnection: Send {
    /// Run a statement and buffer its full result set
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> Result<Table, DatabaseError>;

    /// Run a statement for its side effects, returning rows affected
    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError>;

    /// Commit the open transaction
    async fn commit(&mut self) -> Result<(), DatabaseError>;

    /// Close the connection; later calls fail
    async fn close(&mut self) -> Result<(), DatabaseError>;
}

/// Opens connections for an engine
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn SqlConnection>, DatabaseError>;
}

// ============================================================================
// Engine
// ============================================================================

/// Reusable connection factory for one database
///
/// Cheap to clone; clones share the connector.
#[derive(Clone)]
pub struct SqlEngine {
    settings: ConnectionSettings,
    connector: Arc<dyn SqlConnector>,
}

impl fmt::Debug for SqlEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SqlEngine {
    /// Build an engine after validating `settings`
    ///
    /// # Errors
    /// Returns the validation error; no connection is attempted.
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn SqlConnector>,
    ) -> Result<Self, DatabaseError> {
        settings.validate()?;
        debug!(connection = %settings, "Created SQL engine");
        Ok(Self {
            settings,
            connector,
        })
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Run `sql` with positional `?` parameters and return every row
    ///
    /// The connection is closed before this returns on every path.
    ///
    /// # Errors
    /// - `DatabaseError::ParameterCountMismatch` if `params` does not match the markers
    /// - Connection and driver errors from the connector
    #[instrument(skip_all, fields(database = %self.settings.database, params = params.len()))]
    pub async fn query_to_table(
        &self,
        sql: &str,
        params: &[CellValue],
    ) -> Result<Table, DatabaseError> {
        check_parameter_count(sql, params)?;

        let mut connection = self.open().await?;
        let result = connection.query(sql, params).await;
        let result = finish(connection.as_mut(), result).await;

        if let Ok(table) = &result {
            debug!(rows = table.len(), "Query returned rows");
        }
        result
    }

    pub(crate) async fn open(&self) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        self.connector.connect(&self.settings).await
    }
}

/// Build an engine for `database` on `server` with the fixed Azure SQL defaults
pub fn connect_database(
    database: &str,
    server: &str,
    username: &str,
    password: SecretValue,
    connector: Arc<dyn SqlConnector>,
) -> Result<SqlEngine, DatabaseError> {
    SqlEngine::new(
        ConnectionSettings::new(database, server, username, password),
        connector,
    )
}

pub(crate) fn check_parameter_count(sql: &str, params: &[CellValue]) -> Result<(), DatabaseError> {
    let expected = count_placeholders(sql);
    if expected != params.len() {
        return Err(DatabaseError::ParameterCountMismatch {
            expected,
            actual: params.len(),
        });
    }
    Ok(())
}

/// Close `connection` and combine the close outcome with `result`
///
/// An operation error wins over a close error.
pub(crate) async fn finish<T>(
    connection: &mut dyn SqlConnection,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match (result, connection.close().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_error)) => {
            warn!(error = %close_error, "Failed to close connection after error");
            Err(e)
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from engine construction, connections and statements
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Unsupported ODBC driver: {driver}")]
    UnsupportedDriver { driver: String },

    #[error("Invalid connection setting '{field}': {reason}")]
    InvalidConnectionSettings { field: String, reason: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Login failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connect timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("Statement failed: {message}")]
    QueryFailed { message: String },

    #[error("Statement has {expected} parameter markers but {actual} values were given")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("Invalid procedure name '{name}': {reason}")]
    InvalidProcedureName { name: String, reason: String },

    #[error("Unsupported column type {type_name} in column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    #[error("Connection already closed")]
    ConnectionClosed,

    #[error("Internal database error: {message}")]
    Internal { message: String },
}

impl DatabaseError {
    /// Check if error is transient and a caller-side retry could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. }
        )
    }

    /// Map onto the crate-wide taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedDriver { .. }
            | Self::InvalidConnectionSettings { .. }
            | Self::InvalidProcedureName { .. } => ErrorKind::Configuration,
            Self::AuthenticationFailed { .. } => ErrorKind::Authorization,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::QueryFailed { .. }
            | Self::ParameterCountMismatch { .. }
            | Self::UnsupportedType { .. }
            | Self::ConnectionClosed => ErrorKind::Driver,
            Self::ConnectionFailed { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;
