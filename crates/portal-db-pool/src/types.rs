//! Values, rows and results exchanged with the database

use crate::error::PoolError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single bound parameter or decoded column value.
///
/// Serialized untagged, so JSON carries plain values. `Timestamp` (RFC 3339)
/// and `Uuid` are written as strings and read back as
/// [`QueryValue::String`]; the typed accessors on [`Row`] parse them again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Bytes(Vec<u8>),
	Timestamp(DateTime<Utc>),
	Uuid(Uuid),
}

impl QueryValue {
	pub fn is_null(&self) -> bool {
		matches!(self, QueryValue::Null)
	}

	fn type_name(&self) -> &'static str {
		match self {
			QueryValue::Null => "null",
			QueryValue::Bool(_) => "bool",
			QueryValue::Int(_) => "int",
			QueryValue::Float(_) => "float",
			QueryValue::String(_) => "string",
			QueryValue::Bytes(_) => "bytes",
			QueryValue::Timestamp(_) => "timestamp",
			QueryValue::Uuid(_) => "uuid",
		}
	}

	fn mismatch(&self, expected: &str) -> PoolError {
		PoolError::Conversion(format!("expected {}, found {}", expected, self.type_name()))
	}
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i64::from(i))
	}
}

impl From<f64> for QueryValue {
	fn from(f: f64) -> Self {
		QueryValue::Float(f)
	}
}

impl From<bool> for QueryValue {
	fn from(b: bool) -> Self {
		QueryValue::Bool(b)
	}
}

impl From<Vec<u8>> for QueryValue {
	fn from(bytes: Vec<u8>) -> Self {
		QueryValue::Bytes(bytes)
	}
}

impl From<DateTime<Utc>> for QueryValue {
	fn from(dt: DateTime<Utc>) -> Self {
		QueryValue::Timestamp(dt)
	}
}

impl From<Uuid> for QueryValue {
	fn from(u: Uuid) -> Self {
		QueryValue::Uuid(u)
	}
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(QueryValue::Null, Into::into)
	}
}

impl TryFrom<QueryValue> for i64 {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => Ok(i),
			QueryValue::Bool(b) => Ok(i64::from(b)),
			other => Err(other.mismatch("int")),
		}
	}
}

impl TryFrom<QueryValue> for i32 {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		let wide = i64::try_from(value)?;
		i32::try_from(wide)
			.map_err(|_| PoolError::Conversion(format!("{} does not fit in i32", wide)))
	}
}

impl TryFrom<QueryValue> for f64 {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Float(f) => Ok(f),
			QueryValue::Int(i) => Ok(i as f64),
			other => Err(other.mismatch("float")),
		}
	}
}

impl TryFrom<QueryValue> for bool {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Bool(b) => Ok(b),
			// SQLite has no boolean storage class
			QueryValue::Int(0) => Ok(false),
			QueryValue::Int(1) => Ok(true),
			other => Err(other.mismatch("bool")),
		}
	}
}

impl TryFrom<QueryValue> for String {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::String(s) => Ok(s),
			QueryValue::Uuid(u) => Ok(u.to_string()),
			other => Err(other.mismatch("string")),
		}
	}
}

impl TryFrom<QueryValue> for Vec<u8> {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Bytes(b) => Ok(b),
			other => Err(other.mismatch("bytes")),
		}
	}
}

impl TryFrom<QueryValue> for DateTime<Utc> {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Timestamp(dt) => Ok(dt),
			QueryValue::String(s) => DateTime::parse_from_rfc3339(&s)
				.map(|dt| dt.with_timezone(&Utc))
				.map_err(|e| PoolError::Conversion(format!("invalid timestamp: {}", e))),
			other => Err(other.mismatch("timestamp")),
		}
	}
}

impl TryFrom<QueryValue> for Uuid {
	type Error = PoolError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Uuid(u) => Ok(u),
			QueryValue::String(s) => Uuid::parse_str(&s)
				.map_err(|e| PoolError::Conversion(format!("invalid UUID: {}", e))),
			other => Err(other.mismatch("uuid")),
		}
	}
}

/// One result row; columns keep the order the server returned them in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
	pub data: IndexMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<QueryValue>) {
		self.data.insert(key.into(), value.into());
	}

	/// Decode a column into `T`
	///
	/// # Examples
	///
	/// ```
	/// use portal_db_pool::Row;
	///
	/// let mut row = Row::new();
	/// row.insert("id", 7_i64);
	/// assert_eq!(row.get::<i64>("id").unwrap(), 7);
	/// assert!(row.get::<String>("id").is_err());
	/// ```
	pub fn get<T>(&self, key: &str) -> Result<T, PoolError>
	where
		T: TryFrom<QueryValue, Error = PoolError>,
	{
		let value = self
			.data
			.get(key)
			.ok_or_else(|| PoolError::Conversion(format!("no column named '{}'", key)))?;
		T::try_from(value.clone())
	}

	/// Like [`Row::get`], mapping SQL `NULL` to `None`
	pub fn get_opt<T>(&self, key: &str) -> Result<Option<T>, PoolError>
	where
		T: TryFrom<QueryValue, Error = PoolError>,
	{
		match self.data.get(key) {
			Some(QueryValue::Null) => Ok(None),
			Some(_) => self.get(key).map(Some),
			None => Err(PoolError::Conversion(format!("no column named '{}'", key))),
		}
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	pub fn columns(&self) -> impl Iterator<Item = &str> {
		self.data.keys().map(String::as_str)
	}
}

/// Name and server-side type of a result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
	pub name: String,
	pub type_name: String,
}

/// Outcome of one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
	pub rows: Vec<Row>,
	/// Returned rows when any came back, rows affected otherwise
	pub row_count: u64,
	/// Leading keyword of the statement, upper-cased
	pub command: String,
	pub fields: Vec<FieldDescriptor>,
}

impl QueryResult {
	/// Result of a statement that returned no rows
	pub fn affected(sql: &str, rows_affected: u64) -> Self {
		Self {
			rows: Vec::new(),
			row_count: rows_affected,
			command: command_tag(sql),
			fields: Vec::new(),
		}
	}

	/// Result of a statement that returned rows
	pub fn with_rows(sql: &str, rows: Vec<Row>, fields: Vec<FieldDescriptor>) -> Self {
		Self {
			row_count: rows.len() as u64,
			rows,
			command: command_tag(sql),
			fields,
		}
	}

	pub fn first(&self) -> Option<&Row> {
		self.rows.first()
	}
}

/// Upper-cased first keyword of a statement (`"select 1"` -> `"SELECT"`)
pub fn command_tag(sql: &str) -> String {
	sql.split_whitespace()
		.next()
		.map(|word| {
			word.trim_end_matches(';')
				.trim_start_matches('(')
				.to_uppercase()
		})
		.unwrap_or_default()
}
