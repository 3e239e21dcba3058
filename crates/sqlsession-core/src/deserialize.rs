//! Row -> typed value conversion.
//!
//! Drivers hand back untyped [`Row`]s. A [`TypeDeserializer<T>`] is the single
//! capability that turns one of those rows into a `T`. Three implementations
//! ship here:
//!
//! - [`RowDeserializer`] for types implementing [`FromRow`]
//! - [`FnDeserializer`] wrapping a closure
//! - [`SerdeDeserializer`] going through `serde_json` for any `DeserializeOwned`

use crate::error::{Error, Result};
use crate::row::Row;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Converts an untyped row into a strongly-typed value.
pub trait TypeDeserializer<T>: Send + Sync {
    /// Deserialize one row.
    #[allow(clippy::result_large_err)]
    fn deserialize(&self, row: &Row) -> Result<T>;
}

/// Types that know how to build themselves from a row.
pub trait FromRow: Sized {
    /// Build a value from a row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

/// [`TypeDeserializer`] for any [`FromRow`] type.
pub struct RowDeserializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> RowDeserializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for RowDeserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromRow> TypeDeserializer<T> for RowDeserializer<T> {
    fn deserialize(&self, row: &Row) -> Result<T> {
        T::from_row(row)
    }
}

/// [`TypeDeserializer`] backed by a closure.
pub struct FnDeserializer<F> {
    f: F,
}

impl<F> FnDeserializer<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<T, F> TypeDeserializer<T> for FnDeserializer<F>
where
    F: Fn(&Row) -> Result<T> + Send + Sync,
{
    fn deserialize(&self, row: &Row) -> Result<T> {
        (self.f)(row)
    }
}

/// [`TypeDeserializer`] that maps the row to a JSON object keyed by column
/// name and hands it to `serde_json`.
pub struct SerdeDeserializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeDeserializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeDeserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> TypeDeserializer<T> for SerdeDeserializer<T> {
    fn deserialize(&self, row: &Row) -> Result<T> {
        let object = serde_json::Value::Object(row.to_json_object());
        serde_json::from_value(object).map_err(|e| Error::Serde(e.to_string()))
    }
}

/// Deserialize every row, stopping at the first failure.
#[allow(clippy::result_large_err)]
pub fn deserialize_all<T, D>(deserializer: &D, rows: &[Row]) -> Result<Vec<T>>
where
    D: TypeDeserializer<T> + ?Sized,
{
    rows.iter().map(|row| deserializer.deserialize(row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Item {
        id: i64,
        name: String,
        note: Option<String>,
    }

    impl FromRow for Item {
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                name: row.get_named("name")?,
                note: row.get_named("note")?,
            })
        }
    }

    fn rows() -> Vec<Row> {
        let columns = vec!["id".to_string(), "name".to_string(), "note".to_string()];
        vec![
            Row::new(
                columns.clone(),
                vec![Value::Int(1), Value::Text("a".into()), Value::Null],
            ),
            Row::new(
                columns,
                vec![
                    Value::BigInt(2),
                    Value::Text("b".into()),
                    Value::Text("n".into()),
                ],
            ),
        ]
    }

    #[test]
    fn row_deserializer_uses_from_row() {
        let items = deserialize_all(&RowDeserializer::<Item>::new(), &rows()).unwrap();
        assert_eq!(items[0].name, "a");
        assert_eq!(items[1].note.as_deref(), Some("n"));
    }

    #[test]
    fn serde_deserializer_matches_from_row() {
        let via_serde = deserialize_all(&SerdeDeserializer::<Item>::new(), &rows()).unwrap();
        let via_row = deserialize_all(&RowDeserializer::<Item>::new(), &rows()).unwrap();
        assert_eq!(via_serde, via_row);
    }

    #[test]
    fn serde_deserializer_reports_missing_fields() {
        let row = Row::new(vec!["id".into()], vec![Value::Int(1)]);
        let err = SerdeDeserializer::<Item>::new().deserialize(&row).unwrap_err();
        assert!(matches!(err, Error::Serde(_)));
    }

    #[test]
    fn closure_deserializer() {
        let names = FnDeserializer::new(|row: &Row| row.get_named::<String>("name"));
        assert_eq!(deserialize_all(&names, &rows()).unwrap(), vec!["a", "b"]);
    }
}
