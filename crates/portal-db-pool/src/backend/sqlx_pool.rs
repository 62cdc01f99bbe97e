//! sqlx-backed physical pool

use super::{Connection, PhysicalPool, PhysicalPoolState};
use crate::error::{PoolError, PoolResult};
use crate::events::{EventEmitter, PoolEvent};
use crate::role::PoolRole;
use crate::types::{FieldDescriptor, QueryResult, QueryValue, Row};
use async_trait::async_trait;
use futures::TryStreamExt;
use once_cell::sync::OnceCell;
use portal_db_conf::PoolEndpointConfig;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, AnyPool, Column, Either, Executor, Row as _, TypeInfo};
use std::time::Duration;

static INSTALL_DRIVERS: OnceCell<()> = OnceCell::new();

/// Lazily connecting sqlx pool for one role
pub struct SqlxPool {
	pool: AnyPool,
	role: PoolRole,
	masked_url: String,
}

impl SqlxPool {
	/// Build the pool without opening any connection.
	///
	/// New sessions get the endpoint's statement timeout and emit
	/// `ConnectionOpened`.
	pub fn connect_lazy(
		role: PoolRole,
		config: &PoolEndpointConfig,
		events: EventEmitter,
	) -> PoolResult<Self> {
		INSTALL_DRIVERS.get_or_init(sqlx::any::install_default_drivers);

		let url = config
			.connection_url()
			.map_err(|e| PoolError::Config(format!("invalid {} endpoint: {}", role, e)))?;
		let statement_timeout = config.statement_timeout;

		let pool = AnyPoolOptions::new()
			.max_connections(config.max_connections)
			.min_connections(config.min_connections)
			.acquire_timeout(config.connect_timeout)
			.idle_timeout(config.idle_timeout)
			.test_before_acquire(true)
			.after_connect(move |conn, _meta| {
				events.emit(PoolEvent::connection_opened(role));
				Box::pin(async move { apply_statement_timeout(conn, statement_timeout).await })
			})
			.connect_lazy(&url)?;

		Ok(Self {
			pool,
			role,
			masked_url: config.masked_url(),
		})
	}

	pub fn role(&self) -> PoolRole {
		self.role
	}

	/// The underlying sqlx pool
	pub fn inner(&self) -> &AnyPool {
		&self.pool
	}
}

#[async_trait]
impl PhysicalPool for SqlxPool {
	async fn acquire(&self) -> PoolResult<Box<dyn Connection>> {
		let conn = self.pool.acquire().await?;
		Ok(Box::new(SqlxConnection { conn }))
	}

	fn state(&self) -> PhysicalPoolState {
		PhysicalPoolState {
			size: self.pool.size(),
			idle: u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
		}
	}

	async fn close(&self) {
		self.pool.close().await;
	}

	fn is_closed(&self) -> bool {
		self.pool.is_closed()
	}

	fn describe(&self) -> String {
		self.masked_url.clone()
	}
}

struct SqlxConnection {
	conn: PoolConnection<Any>,
}

#[async_trait]
impl Connection for SqlxConnection {
	async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> PoolResult<QueryResult> {
		let query = params
			.iter()
			.fold(sqlx::query(sql), |query, value| bind_value(query, value));

		let mut stream = (&mut *self.conn).fetch_many(query);
		let mut rows = Vec::new();
		let mut fields = Vec::new();
		let mut rows_affected = 0;

		while let Some(item) = stream.try_next().await? {
			match item {
				Either::Left(done) => rows_affected += done.rows_affected(),
				Either::Right(row) => {
					if fields.is_empty() {
						fields = describe_columns(&row);
					}
					rows.push(decode_row(&row)?);
				}
			}
		}

		if rows.is_empty() && fields.is_empty() {
			Ok(QueryResult::affected(sql, rows_affected))
		} else {
			Ok(QueryResult::with_rows(sql, rows, fields))
		}
	}

	async fn set_statement_timeout(&mut self, timeout: Option<Duration>) -> PoolResult<()> {
		apply_statement_timeout(&mut self.conn, timeout).await?;
		Ok(())
	}

	async fn close(self: Box<Self>) -> PoolResult<()> {
		self.conn.close().await?;
		Ok(())
	}
}

/// `None` and zero both lift the limit
async fn apply_statement_timeout(
	conn: &mut AnyConnection,
	timeout: Option<Duration>,
) -> Result<(), sqlx::Error> {
	let millis = timeout.map_or(0, |t| t.as_millis());
	let sql = match conn.backend_name() {
		"PostgreSQL" => format!("SET statement_timeout = {}", millis),
		"MySQL" => format!("SET SESSION max_execution_time = {}", millis),
		// SQLite has no server-side statement timeout
		_ => return Ok(()),
	};
	conn.execute(sql.as_str()).await?;
	Ok(())
}

fn bind_value<'q>(
	query: Query<'q, Any, AnyArguments<'q>>,
	value: &QueryValue,
) -> Query<'q, Any, AnyArguments<'q>> {
	match value {
		QueryValue::Null => query.bind(Option::<String>::None),
		QueryValue::Bool(b) => query.bind(*b),
		QueryValue::Int(i) => query.bind(*i),
		QueryValue::Float(f) => query.bind(*f),
		QueryValue::String(s) => query.bind(s.clone()),
		QueryValue::Bytes(b) => query.bind(b.clone()),
		QueryValue::Timestamp(dt) => query.bind(dt.to_rfc3339()),
		QueryValue::Uuid(u) => query.bind(u.to_string()),
	}
}

fn describe_columns(row: &AnyRow) -> Vec<FieldDescriptor> {
	row.columns()
		.iter()
		.map(|column| FieldDescriptor {
			name: column.name().to_string(),
			type_name: column.type_info().name().to_string(),
		})
		.collect()
}

fn decode_row(row: &AnyRow) -> PoolResult<Row> {
	let mut decoded = Row::new();
	for (index, column) in row.columns().iter().enumerate() {
		decoded.insert(column.name(), decode_column(row, index)?);
	}
	Ok(decoded)
}

fn decode_column(row: &AnyRow, index: usize) -> PoolResult<QueryValue> {
	if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<String>, _>(index) {
		return Ok(value.into());
	}
	if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
		return Ok(value.into());
	}
	Err(PoolError::Conversion(format!(
		"unsupported column type '{}' at index {}",
		row.columns()[index].type_info().name(),
		index
	)))
}
