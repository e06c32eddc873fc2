use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{Days, Local};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::params;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{Cell, ColumnInfo, ExecutionOutcome, QueryResult};
use crate::schema::sales;

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// The dataset a conversion runs against.
///
/// `execute` never returns a Rust error: a failing query comes back as
/// [`ExecutionOutcome::Error`] carrying the executor's message, which the
/// orchestrator feeds into its corrective prompt.
pub trait DatasetExecutor: Send + Sync {
    /// Check that the dataset can be reached
    fn ping(&self) -> Result<()>;

    /// Run a query and return its table or error text
    fn execute(&self, sql: &str) -> ExecutionOutcome;

    /// Names of the user tables, sorted
    fn list_tables(&self) -> Result<Vec<String>>;

    /// Column metadata for one table, in declaration order
    fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>>;
}

/// Quote an identifier for interpolation into SQL text
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite dataset behind an r2d2 connection pool
pub struct SqliteExecutor {
    pool: DbPool,
}

impl SqliteExecutor {
    /// Open (or create) a database file with a connection pool
    pub fn open(path: &str, max_connections: u32, connection_timeout: Duration) -> anyhow::Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(connection_timeout)
            .build(manager)
            .context("Failed to create database connection pool")?;

        debug!(path, max_connections, "Database pool created");
        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Create the reference `sales` table if it does not exist
    pub fn initialize(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(sales::CREATE_TABLE_SQL)?;
        Ok(())
    }

    /// Replace the contents of `sales` with `rows` random but plausible sales
    pub fn seed_sales<R: Rng>(&self, rows: usize, rng: &mut R) -> Result<usize> {
        self.initialize()?;
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        tx.execute(&format!("DELETE FROM {}", sales::TABLE), [])?;

        let today = Local::now().date_naive();
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?)",
                sales::TABLE,
                sales::DATE,
                sales::AMOUNT,
                sales::PRODUCT,
                sales::REGION,
                sales::QUANTITY,
                sales::CUSTOMER_TYPE
            ))?;

            for _ in 0..rows {
                let offset = rng.gen_range(0..=180_u64);
                let date = today.checked_sub_days(Days::new(offset)).unwrap_or(today);

                let &(product, min_amount, max_amount) =
                    sales::PRODUCTS.choose(rng).unwrap_or(&("Laptop", 800.0, 2500.0));
                let region = sales::REGIONS.choose(rng).copied().unwrap_or("North");
                let customer_type = sales::CUSTOMER_TYPES.choose(rng).copied().unwrap_or("Regular");
                let amount = (rng.gen_range(min_amount..max_amount) * 100.0).round() / 100.0;
                let quantity: i64 = rng.gen_range(1..=10);

                stmt.execute(params![
                    date.format("%Y-%m-%d").to_string(),
                    amount,
                    product,
                    region,
                    quantity,
                    customer_type
                ])?;
            }
        }

        tx.commit()?;
        info!(rows, "Seeded sales table");
        Ok(rows)
    }

    fn run_query(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(Cell::from(row.get_ref(index)?));
            }
            rows.push(values);
        }

        Ok(QueryResult { columns, rows })
    }
}

impl DatasetExecutor for SqliteExecutor {
    fn ping(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn execute(&self, sql: &str) -> ExecutionOutcome {
        debug!(sql = %sql.chars().take(100).collect::<String>(), "Executing query");

        match self.run_query(sql) {
            Ok(result) => {
                debug!(rows = result.row_count(), columns = result.columns.len(), "Query result");
                ExecutionOutcome::Table(result)
            }
            Err(e) => {
                warn!(error = %e, "Query failed");
                ExecutionOutcome::Error(e.to_string())
            }
        }
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for name in names {
            tables.push(name?);
        }

        debug!(count = tables.len(), "Listed tables");
        Ok(tables)
    }

    fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
        let columns = stmt.query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get("name")?,
                declared_type: row.get::<_, Option<String>>("type")?.unwrap_or_default(),
                nullable: row.get::<_, i64>("notnull")? == 0,
                primary_key: row.get::<_, i64>("pk")? > 0,
            })
        })?;

        let mut results = Vec::new();
        for column in columns {
            results.push(column?);
        }

        if results.is_empty() {
            warn!(table, "Table not found or has no columns");
        }
        Ok(results)
    }
}
