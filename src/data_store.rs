//! Data Store Gateway (A4): thin, read-only wrapper around the tabular data store.
//! Invoked only after the Gate Middleware yields `ALLOW`.

use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgPool};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;

use crate::cell::Cell;
use crate::error::AppError;

/// Fixed allow-list of guarded datasets. Route segments are hyphenated; physical table
/// names are snake_case, chosen so caller-controlled strings are never interpolated
/// into SQL.
const KNOWN_TABLES: &[(&str, &str)] = &[
    ("carteira-logistica", "carteira_logistica"),
    ("mov-estoque-logistica", "mov_estoque_logistica"),
    ("docas-logistica", "docas_logistica"),
    ("pedidos-romaneio-logistica", "pedidos_romaneio_logistica"),
    ("carregamento-logistica", "carregamento_logistica"),
    ("faturamento-logistica", "faturamento_logistica"),
];

pub fn resolve_table(route_segment: &str) -> Option<&'static str> {
    KNOWN_TABLES
        .iter()
        .find(|(route, _)| *route == route_segment)
        .map(|(_, table)| *table)
}

pub struct TableResult {
    pub rows: Vec<Map<String, Value>>,
    pub columns_count: usize,
    pub original_row_count: usize,
}

pub struct DataStore {
    pool: PgPool,
    // Per-call deadline; bounds a query that acquired a connection but is slow to respond.
    call_timeout: Duration,
}

impl DataStore {
    pub async fn connect(database_url: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(connect_timeout)
            .test_before_acquire(true)
            .max_lifetime(Duration::from_secs(3600))
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            call_timeout: connect_timeout,
        })
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        let call = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::DataDbError(e.to_string())),
            Err(_) => Err(AppError::DataDbError("health check timed out".to_string())),
        }
    }

    pub async fn fetch_table(
        &self,
        table: &str,
        limit: Option<i64>,
        offset: i64,
        status_filter: Option<&str>,
    ) -> Result<TableResult, AppError> {
        // `table` is always one of KNOWN_TABLES's physical names, never user input,
        // so direct interpolation here cannot be abused for SQL injection.
        let mut query = format!("SELECT * FROM {table}");
        let mut next_param = 1;

        if status_filter.is_some() {
            query.push_str(&format!(" WHERE status = ${next_param}"));
            next_param += 1;
        }
        query.push_str(&format!(" OFFSET ${next_param}"));
        next_param += 1;
        if limit.is_some() {
            query.push_str(&format!(" LIMIT ${next_param}"));
        }

        let mut q = sqlx::query(&query);
        if let Some(status_filter) = status_filter {
            q = q.bind(status_filter);
        }
        q = q.bind(offset);
        if let Some(limit) = limit {
            q = q.bind(limit);
        }

        let rows = match tokio::time::timeout(self.call_timeout, q.fetch_all(&self.pool)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return Err(AppError::DataDbError(e.to_string())),
            Err(_) => return Err(AppError::DataDbError("table fetch timed out".to_string())),
        };

        let columns_count = rows.first().map(|r| r.columns().len()).unwrap_or(0);
        let original_row_count = rows.len();

        let records = rows
            .iter()
            .map(row_to_json_map)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableResult {
            rows: records,
            columns_count,
            original_row_count,
        })
    }
}

fn row_to_json_map(row: &sqlx::postgres::PgRow) -> Result<Map<String, Value>, AppError> {
    let mut map = Map::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let cell = decode_cell(row, column).map_err(|e| AppError::DataDbError(e.to_string()))?;
        map.insert(name, cell.to_json());
    }
    Ok(map)
}

fn decode_cell(row: &sqlx::postgres::PgRow, column: &sqlx::postgres::PgColumn) -> Result<Cell, sqlx::Error> {
    let idx = column.ordinal();
    let type_name = column.type_info().name();

    match type_name {
        "INT2" | "INT4" | "INT8" => {
            let v: Option<i64> = row.try_get(idx)?;
            Ok(v.map(Cell::Integer).unwrap_or(Cell::Null))
        }
        "FLOAT4" | "FLOAT8" => {
            let v: Option<f64> = row.try_get(idx)?;
            Ok(v.map(Cell::Float).unwrap_or(Cell::Null))
        }
        "NUMERIC" => {
            let v: Option<rust_decimal::Decimal> = row.try_get(idx)?;
            Ok(v.map(Cell::Decimal).unwrap_or(Cell::Null))
        }
        "BOOL" => {
            let v: Option<bool> = row.try_get(idx)?;
            Ok(v.map(Cell::Bool).unwrap_or(Cell::Null))
        }
        "TIMESTAMP" | "TIMESTAMPTZ" => {
            let v: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx)?;
            Ok(v.map(Cell::Timestamp).unwrap_or(Cell::Null))
        }
        "BYTEA" => {
            let v: Option<Vec<u8>> = row.try_get(idx)?;
            Ok(v.map(Cell::Bytes).unwrap_or(Cell::Null))
        }
        _ => {
            let v: Option<String> = row.try_get(idx)?;
            Ok(v.map(Cell::Text).unwrap_or(Cell::Null))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tables_resolve_to_snake_case() {
        assert_eq!(resolve_table("carteira-logistica"), Some("carteira_logistica"));
        assert_eq!(resolve_table("faturamento-logistica"), Some("faturamento_logistica"));
    }

    #[test]
    fn unknown_table_is_rejected() {
        assert_eq!(resolve_table("'; DROP TABLE users; --"), None);
    }
}
