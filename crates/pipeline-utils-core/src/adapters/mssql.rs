//! # SQL Server Implementation
//!
//! Azure SQL connections over TDS using tiberius. Statements written with
//! `?` markers are rewritten to `@P1..@Pn` before they are sent.

use crate::database::{
    connect_database as build_engine, rewrite_placeholders, ConnectionSettings, DatabaseError,
    SqlConnection, SqlConnector, SqlEngine,
};
use crate::key_vault::SecretValue;
use crate::table::{CellValue, Table};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use tiberius::error::Error as TdsError;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, instrument, warn};

type MssqlClient = Client<Compat<TcpStream>>;

/// SQL Server error number for a rejected login
const LOGIN_FAILED: u32 = 18456;

const APPLICATION_NAME: &str = "pipeline-utils";

/// Opens TDS connections to Azure SQL
#[derive(Debug, Clone, Default)]
pub struct MssqlConnector;

impl MssqlConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Build an engine backed by SQL Server for `database` on `server`
pub fn connect_database(
    database: &str,
    server: &str,
    username: &str,
    password: SecretValue,
) -> Result<SqlEngine, DatabaseError> {
    build_engine(
        database,
        server,
        username,
        password,
        Arc::new(MssqlConnector::new()),
    )
}

#[async_trait]
impl SqlConnector for MssqlConnector {
    #[instrument(skip_all, fields(server = %settings.server_fqdn(), database = %settings.database))]
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        let config = build_config(settings);
        let timeout_seconds = settings.connect_timeout.as_secs();

        let client = tokio::time::timeout(settings.connect_timeout, open_client(config))
            .await
            .map_err(|_| DatabaseError::Timeout { timeout_seconds })??;

        info!("Connected to SQL Server");
        Ok(Box::new(MssqlConnection {
            client: Some(client),
            in_transaction: false,
        }))
    }
}

pub(crate) fn build_config(settings: &ConnectionSettings) -> Config {
    let mut config = Config::new();
    config.host(settings.server_fqdn());
    config.port(settings.port);
    config.database(&settings.database);
    config.application_name(APPLICATION_NAME);
    config.authentication(AuthMethod::sql_server(
        &settings.username,
        settings.password.expose_secret(),
    ));

    if settings.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::Off);
    }
    if settings.trust_server_certificate {
        config.trust_cert();
    }
    config
}

async fn open_client(mut config: Config) -> Result<MssqlClient, DatabaseError> {
    match connect_tcp(config.clone()).await {
        Ok(client) => Ok(client),
        // Azure SQL gateways may redirect to the node hosting the database
        Err(TdsError::Routing { host, port }) => {
            debug!(host = %host, port, "Following SQL Server redirect");
            config.host(&host);
            config.port(port);
            connect_tcp(config).await.map_err(map_tds_error)
        }
        Err(e) => Err(map_tds_error(e)),
    }
}

async fn connect_tcp(config: Config) -> Result<MssqlClient, TdsError> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

// ============================================================================
// Connection
// ============================================================================

struct MssqlConnection {
    client: Option<MssqlClient>,
    in_transaction: bool,
}

impl MssqlConnection {
    fn client(&mut self) -> Result<&mut MssqlClient, DatabaseError> {
        self.client.as_mut().ok_or(DatabaseError::ConnectionClosed)
    }

    async fn run_batch(&mut self, sql: &'static str) -> Result<(), DatabaseError> {
        self.client()?
            .execute(sql, &[])
            .await
            .map_err(map_tds_error)?;
        Ok(())
    }
}

fn bind_params<'a>(sql: &str, params: &'a [CellValue]) -> Query<'a> {
    let mut query = Query::new(rewrite_placeholders(sql));
    for param in params {
        match param {
            CellValue::Null => query.bind(Option::<&str>::None),
            CellValue::Bool(value) => query.bind(*value),
            CellValue::Int(value) => query.bind(*value),
            CellValue::Float(value) => query.bind(*value),
            CellValue::Text(value) => query.bind(value.as_str()),
            CellValue::DateTime(value) => query.bind(*value),
            CellValue::Bytes(value) => query.bind(value.as_slice()),
        }
    }
    query
}

#[async_trait]
impl SqlConnection for MssqlConnection {
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> Result<Table, DatabaseError> {
        let query = bind_params(sql, params);
        let mut stream = query
            .query(self.client()?)
            .await
            .map_err(map_tds_error)?;

        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(map_tds_error)?
            .map(|columns| columns.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream.into_first_result().await.map_err(map_tds_error)?;

        let mut table = Table::new(columns.clone());
        for row in rows {
            let mut cells = Vec::with_capacity(columns.len());
            for (index, data) in row.into_iter().enumerate() {
                let column = columns.get(index).map(String::as_str).unwrap_or_default();
                cells.push(cell_from_column(column, data)?);
            }
            table.push_row(cells).map_err(|e| DatabaseError::Internal {
                message: e.to_string(),
            })?;
        }
        Ok(table)
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        if !self.in_transaction {
            self.run_batch("BEGIN TRANSACTION").await?;
            self.in_transaction = true;
        }

        let query = bind_params(sql, params);
        let result = query
            .execute(self.client()?)
            .await
            .map_err(map_tds_error)?;
        Ok(result.total())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction {
            self.run_batch("COMMIT TRANSACTION").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction {
            if let Err(e) = self.run_batch("ROLLBACK TRANSACTION").await {
                warn!(error = %e, "Rollback before close failed");
            }
            self.in_transaction = false;
        }

        let client = self.client.take().ok_or(DatabaseError::ConnectionClosed)?;
        client.close().await.map_err(map_tds_error)
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Convert one TDS column value into a table cell
pub(crate) fn cell_from_column(
    column: &str,
    data: ColumnData<'static>,
) -> Result<CellValue, DatabaseError> {
    let cell = match &data {
        ColumnData::U8(v) => v.map(|v| CellValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| CellValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| CellValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(CellValue::Int),
        ColumnData::F32(v) => v.map(|v| CellValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(CellValue::Float),
        ColumnData::Bit(v) => v.map(CellValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|v| CellValue::Text(v.to_string())),
        ColumnData::Guid(v) => v.map(|v| CellValue::Text(v.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|v| CellValue::Bytes(v.to_vec())),
        ColumnData::Numeric(v) => v.map(|n| {
            CellValue::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)
                .map_err(|e| unsupported(column, e))?
                .map(CellValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .map_err(|e| unsupported(column, e))?
            .map(|d| CellValue::DateTime(d.and_time(NaiveTime::MIN))),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .map_err(|e| unsupported(column, e))?
            .map(|t| CellValue::Text(t.to_string())),
        ColumnData::DateTimeOffset(_) => {
            chrono::DateTime::<chrono::Utc>::from_sql(&data)
                .map_err(|e| unsupported(column, e))?
                .map(|dt| CellValue::DateTime(dt.naive_utc()))
        }
        ColumnData::Xml(_) => {
            return Err(DatabaseError::UnsupportedType {
                column: column.to_string(),
                type_name: "xml".to_string(),
            })
        }
    };
    Ok(cell.unwrap_or(CellValue::Null))
}

fn unsupported(column: &str, error: TdsError) -> DatabaseError {
    DatabaseError::UnsupportedType {
        column: column.to_string(),
        type_name: error.to_string(),
    }
}

/// Map a driver error onto `DatabaseError`
pub(crate) fn map_tds_error(error: TdsError) -> DatabaseError {
    match error {
        TdsError::Server(token) if token.code() == LOGIN_FAILED => {
            DatabaseError::AuthenticationFailed {
                message: token.message().to_string(),
            }
        }
        TdsError::Server(token) => DatabaseError::QueryFailed {
            message: format!("{} (error {})", token.message(), token.code()),
        },
        TdsError::Io { message, .. } => DatabaseError::ConnectionFailed { message },
        e @ (TdsError::Tls(_) | TdsError::Routing { .. }) => DatabaseError::ConnectionFailed {
            message: e.to_string(),
        },
        e => DatabaseError::QueryFailed {
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
#[path = "mssql_tests.rs"]
mod tests;
