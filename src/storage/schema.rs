// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

use crate::exec::chunk::normalize_column_name;
use crate::storage::types::ObjectType;

/// Column type as declared in the tablet schema.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: i8 },
    Date,
    Datetime,
    /// Fixed display width in bytes; values are padded to exactly `len`.
    Char { len: usize },
    Varchar { len: usize },
    Hll,
    Bitmap,
}

impl LogicalType {
    /// Map a StarRocks type name (as found in tablet schema metadata) to a
    /// logical type. `length` is required for CHAR and optional for VARCHAR.
    pub fn from_type_name(
        type_name: &str,
        length: Option<usize>,
        precision: Option<u8>,
        scale: Option<i8>,
    ) -> Result<Self, String> {
        let upper = type_name.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "BOOLEAN" => Self::Boolean,
            "TINYINT" => Self::TinyInt,
            "SMALLINT" => Self::SmallInt,
            "INT" => Self::Int,
            "BIGINT" => Self::BigInt,
            "FLOAT" => Self::Float,
            "DOUBLE" => Self::Double,
            "DATE" | "DATE_V2" => Self::Date,
            "DATETIME" | "TIMESTAMP" => Self::Datetime,
            "DECIMAL" | "DECIMALV2" | "DECIMAL32" | "DECIMAL64" | "DECIMAL128" => {
                let precision = precision
                    .ok_or_else(|| format!("{upper} column requires precision"))?;
                let scale = scale.unwrap_or(0);
                if precision == 0 || precision > 38 {
                    return Err(format!("{upper} precision out of range: {precision}"));
                }
                if scale < 0 || scale as u8 > precision {
                    return Err(format!(
                        "{upper} scale out of range: precision={precision} scale={scale}"
                    ));
                }
                Self::Decimal { precision, scale }
            }
            "CHAR" => {
                let len = length.ok_or_else(|| "CHAR column requires length".to_string())?;
                if len == 0 || len > 255 {
                    return Err(format!("CHAR length out of range: {len}"));
                }
                Self::Char { len }
            }
            "VARCHAR" | "STRING" => Self::Varchar {
                len: length.unwrap_or(65_533),
            },
            "HLL" => Self::Hll,
            "OBJECT" | "BITMAP" => Self::Bitmap,
            other => return Err(format!("unsupported column type for push: {other}")),
        })
    }

    /// Arrow type holding this column inside a chunk.
    pub fn physical_type(&self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::TinyInt => DataType::Int8,
            Self::SmallInt => DataType::Int16,
            Self::Int => DataType::Int32,
            Self::BigInt => DataType::Int64,
            Self::Float => DataType::Float32,
            Self::Double => DataType::Float64,
            Self::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            Self::Date => DataType::Date32,
            Self::Datetime => DataType::Timestamp(TimeUnit::Microsecond, None),
            Self::Char { .. } | Self::Varchar { .. } => DataType::Utf8,
            Self::Hll | Self::Bitmap => DataType::Binary,
        }
    }

    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Hll => Some(ObjectType::Hll),
            Self::Bitmap => Some(ObjectType::Bitmap),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::TinyInt => write!(f, "TINYINT"),
            Self::SmallInt => write!(f, "SMALLINT"),
            Self::Int => write!(f, "INT"),
            Self::BigInt => write!(f, "BIGINT"),
            Self::Float => write!(f, "FLOAT"),
            Self::Double => write!(f, "DOUBLE"),
            Self::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            Self::Date => write!(f, "DATE"),
            Self::Datetime => write!(f, "DATETIME"),
            Self::Char { len } => write!(f, "CHAR({len})"),
            Self::Varchar { len } => write!(f, "VARCHAR({len})"),
            Self::Hll => write!(f, "HLL"),
            Self::Bitmap => write!(f, "BITMAP"),
        }
    }
}

pub const FIELD_META_LOGICAL_TYPE: &str = "novarocks.logical_type";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TabletColumn {
    pub name: String,
    pub logical_type: LogicalType,
    pub is_nullable: bool,
    pub is_key: bool,
}

impl TabletColumn {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, is_nullable: bool) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_nullable,
            is_key: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn to_arrow_field(&self) -> Field {
        let mut meta = std::collections::HashMap::new();
        meta.insert(
            FIELD_META_LOGICAL_TYPE.to_string(),
            self.logical_type.to_string(),
        );
        Field::new(
            self.name.clone(),
            self.logical_type.physical_type(),
            self.is_nullable,
        )
        .with_metadata(meta)
    }
}

/// Physical schema of a tablet. Column order is the storage order.
#[derive(Clone, Debug)]
pub struct TabletSchema {
    schema_id: i64,
    columns: Vec<TabletColumn>,
    arrow_schema: SchemaRef,
}

impl TabletSchema {
    pub fn try_new(schema_id: i64, columns: Vec<TabletColumn>) -> Result<Self, String> {
        if columns.is_empty() {
            return Err(format!("tablet schema {schema_id} has no columns"));
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            let name = normalize_column_name(&col.name);
            if name.is_empty() {
                return Err(format!(
                    "tablet schema {schema_id} column[{idx}] has empty name"
                ));
            }
            if !seen.insert(name) {
                return Err(format!(
                    "tablet schema {schema_id} has duplicate column name: {}",
                    col.name
                ));
            }
        }
        let arrow_schema = Arc::new(Schema::new(
            columns
                .iter()
                .map(TabletColumn::to_arrow_field)
                .collect::<Vec<_>>(),
        ));
        Ok(Self {
            schema_id,
            columns,
            arrow_schema,
        })
    }

    pub fn schema_id(&self) -> i64 {
        self.schema_id
    }

    pub fn columns(&self) -> &[TabletColumn] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&TabletColumn> {
        let key = normalize_column_name(name);
        self.columns
            .iter()
            .find(|c| normalize_column_name(&c.name) == key)
    }

    /// Arrow schema every chunk handed to a rowset builder of this tablet must carry.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::clone(&self.arrow_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_type_names() {
        assert_eq!(
            LogicalType::from_type_name("char", Some(8), None, None).expect("char"),
            LogicalType::Char { len: 8 }
        );
        assert_eq!(
            LogicalType::from_type_name("OBJECT", None, None, None).expect("object"),
            LogicalType::Bitmap
        );
        assert_eq!(
            LogicalType::from_type_name("DECIMAL64", None, Some(18), Some(4)).expect("decimal"),
            LogicalType::Decimal {
                precision: 18,
                scale: 4
            }
        );
        assert!(LogicalType::from_type_name("CHAR", None, None, None).is_err());
        assert!(LogicalType::from_type_name("PERCENTILE", None, None, None).is_err());
    }

    #[test]
    fn arrow_schema_follows_declared_nullability() {
        let schema = TabletSchema::try_new(
            1,
            vec![
                TabletColumn::new("a", LogicalType::Int, false).key(),
                TabletColumn::new("b", LogicalType::Char { len: 8 }, true),
                TabletColumn::new("u", LogicalType::Bitmap, true),
            ],
        )
        .expect("schema");
        let arrow = schema.arrow_schema();
        assert!(!arrow.field(0).is_nullable());
        assert!(arrow.field(1).is_nullable());
        assert_eq!(arrow.field(1).data_type(), &DataType::Utf8);
        assert_eq!(arrow.field(2).data_type(), &DataType::Binary);
        assert_eq!(
            arrow.field(1).metadata().get(FIELD_META_LOGICAL_TYPE),
            Some(&"CHAR(8)".to_string())
        );
        assert!(schema.column_by_name("B").is_some());
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = TabletSchema::try_new(
            2,
            vec![
                TabletColumn::new("a", LogicalType::Int, false),
                TabletColumn::new("A", LogicalType::Int, false),
            ],
        )
        .expect_err("expected duplicate error");
        assert!(err.contains("duplicate"), "err={err}");
    }
}
