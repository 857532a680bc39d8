use crate::schema::*;
use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Nullable, Text, Timestamp};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("Query failed: malformed row: {0}")]
    Row(#[from] serde_json::Error),
    #[error("Query failed: {0:?} is not a plain SQL identifier")]
    Identifier(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One row of the dashboard view.
#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct TelemetryRow {
    #[diesel(sql_type = Timestamp)]
    pub time: NaiveDateTime,
    #[diesel(sql_type = Nullable<Text>)]
    pub sender: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub recipient: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub portnum: Option<String>,
    #[diesel(sql_type = Nullable<Double>)]
    pub temperature: Option<f64>, // °C
    #[diesel(sql_type = Nullable<Double>)]
    pub humidity: Option<f64>, // percent
    #[diesel(sql_type = Nullable<Text>)]
    pub led1: Option<String>, // 't'/'f', anything else is unknown
    #[diesel(sql_type = Nullable<Text>)]
    pub led2: Option<String>,
}

#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct ClimateRow {
    #[diesel(sql_type = Timestamp)]
    pub time: NaiveDateTime,
    #[diesel(sql_type = Nullable<Double>)]
    pub temperature: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    pub humidity: Option<f64>,
}

/// A named cell of a dynamically shaped row. `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Option<String>,
}

pub type Record = Vec<Field>;

/// Rows of a view whose columns are only known at runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

/// Read side of the telemetry database, one instance per request.
pub trait TelemetryStore {
    /// Full history of the dashboard view, oldest first.
    fn telemetry_history(&mut self, view: &str) -> Result<Vec<TelemetryRow>>;

    /// Time, temperature and humidity of `view`, oldest first.
    fn climate_history(&mut self, view: &str) -> Result<Vec<ClimateRow>>;

    /// The newest `limit` rows of `view` by `order_by`, all columns.
    fn latest_rows(&mut self, view: &str, order_by: &str, limit: u32) -> Result<ResultSet>;
}

/// Opens a fresh store; the store is dropped (and its connection closed)
/// by the caller when the request is done with it.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn TelemetryStore>>;
}

pub struct PgConnector {
    database_url: String,
}

impl PgConnector {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

impl Connector for PgConnector {
    fn connect(&self) -> Result<Box<dyn TelemetryStore>> {
        Ok(Box::new(Db::connect(&self.database_url)?))
    }
}

#[derive(QueryableByName)]
struct ColumnName {
    #[diesel(sql_type = Text)]
    name: String,
}

#[derive(QueryableByName)]
struct JsonRecord {
    #[diesel(sql_type = Text)]
    record: String,
}

pub struct Db {
    conn: PgConnection,
}

impl Db {
    pub fn connect(database_url: &str) -> Result<Self> {
        let conn = PgConnection::establish(database_url)?;

        Ok(Self { conn })
    }

    pub fn clear_raw_messages(&mut self) -> Result<()> {
        diesel::sql_query("TRUNCATE TABLE messages_raw").execute(&mut self.conn)?;
        Ok(())
    }

    /// Inserts one batch of packets in its own transaction.
    pub fn insert_raw_messages(&mut self, batch: &[Value]) -> Result<usize> {
        let rows = batch
            .iter()
            .map(|packet| messages_raw::data.eq(packet))
            .collect::<Vec<_>>();

        let count = self.conn.transaction(|conn| {
            diesel::insert_into(messages_raw::table)
                .values(rows)
                .execute(conn)
        })?;

        Ok(count)
    }

    fn column_names(&mut self, view: &str) -> Result<Vec<String>> {
        let names = diesel::sql_query(
            "SELECT attname::text AS name FROM pg_catalog.pg_attribute \
             WHERE attrelid = $1::regclass AND attnum > 0 AND NOT attisdropped \
             ORDER BY attnum",
        )
        .bind::<Text, _>(view)
        .load::<ColumnName>(&mut self.conn)?;

        Ok(names.into_iter().map(|c| c.name).collect())
    }
}

impl TelemetryStore for Db {
    fn telemetry_history(&mut self, view: &str) -> Result<Vec<TelemetryRow>> {
        let view = quote_identifier(view)?;
        let rows = diesel::sql_query(format!(
            "SELECT \"time\"::timestamp AS \"time\", sender::text AS sender, \
             recipient::text AS recipient, portnum::text AS portnum, \
             temperature::float8 AS temperature, humidity::float8 AS humidity, \
             led1::text AS led1, led2::text AS led2 \
             FROM {view} ORDER BY \"time\" ASC"
        ))
        .load::<TelemetryRow>(&mut self.conn)?;

        Ok(rows)
    }

    fn climate_history(&mut self, view: &str) -> Result<Vec<ClimateRow>> {
        let view = quote_identifier(view)?;
        let rows = diesel::sql_query(format!(
            "SELECT \"time\"::timestamp AS \"time\", temperature::float8 AS temperature, \
             humidity::float8 AS humidity \
             FROM {view} ORDER BY \"time\" ASC"
        ))
        .load::<ClimateRow>(&mut self.conn)?;

        Ok(rows)
    }

    fn latest_rows(&mut self, view: &str, order_by: &str, limit: u32) -> Result<ResultSet> {
        let view = quote_identifier(view)?;
        let order_by = quote_identifier(order_by)?;
        let columns = self.column_names(&view)?;

        // row_to_json keeps every column, whatever its type, in one text value
        let records = diesel::sql_query(format!(
            "SELECT row_to_json(r)::text AS record FROM \
             (SELECT * FROM {view} ORDER BY {order_by} DESC LIMIT $1) AS r \
             ORDER BY r.{order_by} DESC"
        ))
        .bind::<BigInt, _>(i64::from(limit))
        .load::<JsonRecord>(&mut self.conn)?;

        let rows = records
            .iter()
            .map(|r| record_from_json(&columns, &r.record))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultSet { columns, rows })
    }
}

fn record_from_json(columns: &[String], json: &str) -> Result<Record> {
    let object = serde_json::from_str::<serde_json::Map<String, Value>>(json)?;

    Ok(columns
        .iter()
        .map(|name| Field {
            name: name.clone(),
            value: object.get(name).and_then(cell_text),
        })
        .collect())
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name` or `schema.name`, each part a plain identifier.
pub fn is_identifier_path(name: &str) -> bool {
    name.split('.').all(is_identifier)
}

/// Double-quotes each part of a configured relation or column name.
pub fn quote_identifier(name: &str) -> Result<String> {
    if !is_identifier_path(name) {
        return Err(StoreError::Identifier(name.to_owned()));
    }

    Ok(name
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_plain_and_qualified_names() {
        assert_eq!(quote_identifier("messages_clean").unwrap(), "\"messages_clean\"");
        assert_eq!(
            quote_identifier("public.messages_clean").unwrap(),
            "\"public\".\"messages_clean\""
        );
    }

    #[test]
    fn rejects_non_identifiers() {
        for name in ["", "1abc", "a b", "a;drop", "a\"b", "a.", ".a", "messages--"] {
            assert!(quote_identifier(name).is_err(), "{name:?} accepted");
        }
    }

    #[test]
    fn record_follows_column_order() {
        let columns = vec!["ts".to_owned(), "sender".to_owned(), "temperature".to_owned()];
        let record =
            record_from_json(&columns, r#"{"temperature":21.5,"sender":"!abcd","ts":"2025-01-01T10:00:00"}"#)
                .unwrap();

        let names = record.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["ts", "sender", "temperature"]);
        assert_eq!(record[2].value.as_deref(), Some("21.5"));
    }

    #[test]
    fn record_null_and_missing_are_none() {
        let columns = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let record = record_from_json(&columns, r#"{"a":null,"c":true}"#).unwrap();

        assert_eq!(record[0].value, None);
        assert_eq!(record[1].value, None);
        assert_eq!(record[2].value.as_deref(), Some("true"));
    }

    #[test]
    fn malformed_record_is_an_error() {
        let columns = vec!["a".to_owned()];
        assert!(matches!(
            record_from_json(&columns, "[1,2]"),
            Err(StoreError::Row(_))
        ));
    }
}
