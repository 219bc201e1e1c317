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
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BinaryBuilder, StringArray, StringBuilder};
use arrow::compute::{CastOptions, can_cast_types, cast_with_options};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::display::FormatOptions;

use crate::common::status::{PushError, PushResult, PushStage};
use crate::exec::chunk::Chunk;
use crate::storage::schema::{LogicalType, TabletColumn, TabletSchema};
use crate::storage::types::ObjectType;

/// Converts source chunks into chunks laid out exactly as one tablet schema.
///
/// Holds nothing but the target schema, so one converter serves every chunk
/// of a load.
#[derive(Clone, Debug)]
pub struct ChunkConverter {
    schema: TabletSchema,
    arrow_schema: SchemaRef,
}

impl ChunkConverter {
    pub fn new(schema: TabletSchema) -> Self {
        let arrow_schema = schema.arrow_schema();
        Self {
            schema,
            arrow_schema,
        }
    }

    pub fn target_schema(&self) -> &TabletSchema {
        &self.schema
    }

    pub fn convert(&self, chunk: &Chunk) -> PushResult<Chunk> {
        let mut columns = Vec::with_capacity(self.schema.num_columns());
        for column in self.schema.columns() {
            let source = chunk.column_by_name(&column.name).ok_or_else(|| {
                PushError::schema_mismatch(format!(
                    "source does not provide column {}",
                    column.name
                ))
            })?;
            columns.push(convert_column(column, source)?);
        }
        let batch = RecordBatch::try_new(self.arrow_schema.clone(), columns).map_err(|e| {
            PushError::internal_abort(PushStage::Convert, format!("build converted chunk: {e}"))
        })?;
        Chunk::try_new(batch)
            .map_err(|e| PushError::internal_abort(PushStage::Convert, e))
    }
}

fn convert_column(column: &TabletColumn, source: &ArrayRef) -> PushResult<ArrayRef> {
    if !column.is_nullable && source.logical_null_count() > 0 {
        return Err(PushError::schema_mismatch(format!(
            "column {} is NOT NULL but source has {} null values",
            column.name,
            source.logical_null_count()
        )));
    }
    if let Some(object_type) = column.logical_type.object_type() {
        return decode_object_column(column, object_type, source);
    }
    match column.logical_type {
        LogicalType::Char { len } => {
            let values = cast_column(column, source)?;
            pad_char_column(column, len, values.as_string::<i32>())
        }
        _ => cast_column(column, source),
    }
}

fn strict_cast_options() -> CastOptions<'static> {
    CastOptions {
        safe: false,
        format_options: FormatOptions::default(),
    }
}

fn cast_column(column: &TabletColumn, source: &ArrayRef) -> PushResult<ArrayRef> {
    let target = column.logical_type.physical_type();
    if source.data_type() == &target {
        return Ok(Arc::clone(source));
    }
    if !can_cast_types(source.data_type(), &target) {
        return Err(PushError::schema_mismatch(format!(
            "column {} cannot convert {:?} to {}",
            column.name,
            source.data_type(),
            column.logical_type
        )));
    }
    cast_with_options(source, &target, &strict_cast_options()).map_err(|e| {
        PushError::data_corruption(format!(
            "column {} value does not fit {}: {}",
            column.name, column.logical_type, e
        ))
    })
}

/// Right-pad every value with NUL bytes to exactly `width` bytes.
fn pad_char_column(
    column: &TabletColumn,
    width: usize,
    values: &StringArray,
) -> PushResult<ArrayRef> {
    let mut builder = StringBuilder::with_capacity(values.len(), values.len() * width);
    let mut padded = String::with_capacity(width);
    for (row, value) in values.iter().enumerate() {
        let Some(value) = value else {
            builder.append_null();
            continue;
        };
        if value.len() > width {
            return Err(PushError::data_corruption(format!(
                "column {} row {} value of {} bytes exceeds declared width CHAR({})",
                column.name,
                row,
                value.len(),
                width
            )));
        }
        padded.clear();
        padded.push_str(value);
        padded.extend(std::iter::repeat_n('\0', width - value.len()));
        builder.append_value(&padded);
    }
    Ok(Arc::new(builder.finish()))
}

/// Dictionary, view and fixed-width carriers of serialized bytes.
fn is_byte_carrier(data_type: &DataType) -> bool {
    match data_type {
        DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_)
        | DataType::Utf8
        | DataType::LargeUtf8
        | DataType::Utf8View => true,
        DataType::Dictionary(_, value) => is_byte_carrier(value),
        _ => false,
    }
}

fn decode_object_column(
    column: &TabletColumn,
    object_type: ObjectType,
    source: &ArrayRef,
) -> PushResult<ArrayRef> {
    let normalized;
    let source = match source.data_type() {
        DataType::Binary | DataType::LargeBinary | DataType::Utf8 | DataType::LargeUtf8 => source,
        other if is_byte_carrier(other) && can_cast_types(other, &DataType::Binary) => {
            normalized = cast_with_options(source, &DataType::Binary, &strict_cast_options())
                .map_err(|e| {
                    PushError::data_corruption(format!(
                        "column {} cannot read {} bytes from {:?}: {}",
                        column.name,
                        object_type.name(),
                        other,
                        e
                    ))
                })?;
            &normalized
        }
        _ => source,
    };
    let values: Box<dyn Iterator<Item = Option<&[u8]>> + '_> = match source.data_type() {
        DataType::Binary => Box::new(source.as_binary::<i32>().iter()),
        DataType::LargeBinary => Box::new(source.as_binary::<i64>().iter()),
        DataType::Utf8 => Box::new(source.as_string::<i32>().iter().map(|v| v.map(str::as_bytes))),
        DataType::LargeUtf8 => {
            Box::new(source.as_string::<i64>().iter().map(|v| v.map(str::as_bytes)))
        }
        other => {
            return Err(PushError::schema_mismatch(format!(
                "column {} of type {} expects serialized bytes, got {:?}",
                column.name,
                object_type.name(),
                other
            )));
        }
    };
    let mut builder = BinaryBuilder::with_capacity(source.len(), 0);
    for (row, value) in values.enumerate() {
        match value {
            None => builder.append_null(),
            Some(wire) => {
                let stored = object_type.wire_to_storage(wire).map_err(|e| {
                    PushError::data_corruption(format!(
                        "column {} row {} holds malformed {}: {}",
                        column.name,
                        row,
                        object_type.name(),
                        e
                    ))
                })?;
                builder.append_value(stored);
            }
        }
    }
    Ok(Arc::new(builder.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::status::PushErrorKind;
    use crate::storage::types::{BitmapValue, HyperLogLog};
    use arrow::array::{BinaryArray, BinaryViewArray, DictionaryArray, Int32Array, Int64Array};
    use arrow::datatypes::{Field, Int32Type, Schema};

    fn chunk(fields: Vec<(&str, ArrayRef)>) -> Chunk {
        let schema = Arc::new(Schema::new(
            fields
                .iter()
                .map(|(name, arr)| Field::new(*name, arr.data_type().clone(), true))
                .collect::<Vec<_>>(),
        ));
        let batch = RecordBatch::try_new(schema, fields.into_iter().map(|(_, a)| a).collect())
            .expect("batch");
        Chunk::try_new(batch).expect("chunk")
    }

    fn converter(columns: Vec<TabletColumn>) -> ChunkConverter {
        ChunkConverter::new(TabletSchema::try_new(1, columns).expect("schema"))
    }

    #[test]
    fn convert_follows_target_layout() {
        let conv = converter(vec![
            TabletColumn::new("a", LogicalType::BigInt, false).key(),
            TabletColumn::new("b", LogicalType::Varchar { len: 16 }, true),
        ]);
        let input = chunk(vec![
            ("B", Arc::new(StringArray::from(vec!["x", "y"])) as ArrayRef),
            ("extra", Arc::new(Int32Array::from(vec![7, 8]))),
            ("a", Arc::new(Int32Array::from(vec![1, 2]))),
        ]);
        let out = conv.convert(&input).expect("convert");
        assert_eq!(out.schema(), conv.target_schema().arrow_schema());
        let a = out.columns()[0]
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("bigint");
        assert_eq!(a.values().to_vec(), vec![1, 2]);
        assert!(out.schema().field(1).is_nullable());
    }

    #[test]
    fn null_into_not_null_is_schema_mismatch() {
        let conv = converter(vec![TabletColumn::new("a", LogicalType::Int, false)]);
        let input = chunk(vec![(
            "a",
            Arc::new(Int32Array::from(vec![Some(1), None])) as ArrayRef,
        )]);
        let err = conv.convert(&input).expect_err("null rejected");
        assert_eq!(err.kind, PushErrorKind::SchemaMismatch);
    }

    #[test]
    fn missing_and_uncastable_columns() {
        let conv = converter(vec![TabletColumn::new("a", LogicalType::Int, true)]);
        let err = conv
            .convert(&chunk(vec![("z", Arc::new(Int32Array::from(vec![1])) as ArrayRef)]))
            .expect_err("missing");
        assert_eq!(err.kind, PushErrorKind::SchemaMismatch);

        let conv = converter(vec![TabletColumn::new("a", LogicalType::Date, true)]);
        let err = conv
            .convert(&chunk(vec![(
                "a",
                Arc::new(BinaryArray::from(vec![b"x".as_ref()])) as ArrayRef,
            )]))
            .expect_err("uncastable");
        assert_eq!(err.kind, PushErrorKind::SchemaMismatch);
    }

    #[test]
    fn overflow_is_data_corruption() {
        let conv = converter(vec![TabletColumn::new("a", LogicalType::TinyInt, true)]);
        let err = conv
            .convert(&chunk(vec![("a", Arc::new(Int32Array::from(vec![1000])) as ArrayRef)]))
            .expect_err("overflow");
        assert_eq!(err.kind, PushErrorKind::DataCorruption);
    }

    #[test]
    fn char_is_padded_to_declared_width() {
        let conv = converter(vec![TabletColumn::new("c", LogicalType::Char { len: 4 }, true)]);
        let out = conv
            .convert(&chunk(vec![(
                "c",
                Arc::new(StringArray::from(vec![Some("ab"), None, Some(""), Some("abcd")]))
                    as ArrayRef,
            )]))
            .expect("convert");
        let c = out.columns()[0].as_string::<i32>();
        assert_eq!(c.value(0), "ab\0\0");
        assert!(c.is_null(1));
        assert_eq!(c.value(2), "\0\0\0\0");
        assert_eq!(c.value(3), "abcd");
        for v in c.iter().flatten() {
            assert_eq!(v.len(), 4);
        }

        let err = conv
            .convert(&chunk(vec![(
                "c",
                Arc::new(StringArray::from(vec!["abcde"])) as ArrayRef,
            )]))
            .expect_err("too long");
        assert_eq!(err.kind, PushErrorKind::DataCorruption);
        assert!(err.message.contains("exceeds declared width"), "err={err}");
    }

    #[test]
    fn bitmap_membership_survives_conversion() {
        let original = BitmapValue::from_values([1_u64, 5, 1 << 40]);
        let wire = original.serialize().expect("serialize");
        let conv = converter(vec![TabletColumn::new("u", LogicalType::Bitmap, true)]);
        let out = conv
            .convert(&chunk(vec![(
                "u",
                Arc::new(BinaryArray::from(vec![Some(wire.as_slice()), None])) as ArrayRef,
            )]))
            .expect("convert");
        let col = out.columns()[0].as_binary::<i32>();
        assert!(col.is_null(1));
        let decoded = BitmapValue::from_storage_bytes(col.value(0)).expect("storage");
        assert_eq!(decoded.iter().collect::<Vec<_>>(), original.iter().collect::<Vec<_>>());
    }

    #[test]
    fn dictionary_and_view_carriers_decode_objects() {
        let first = BitmapValue::from_values([3_u64, 9]);
        let second = BitmapValue::from_values([1_u64 << 36]);
        let wires = [
            first.serialize().expect("serialize"),
            second.serialize().expect("serialize"),
        ];
        let conv = converter(vec![TabletColumn::new("u", LogicalType::Bitmap, true)]);
        let members = |out: &Chunk, row: usize| {
            let col = out.columns()[0].as_binary::<i32>();
            BitmapValue::from_storage_bytes(col.value(row))
                .expect("storage")
                .iter()
                .collect::<Vec<_>>()
        };

        let dictionary = DictionaryArray::<Int32Type>::try_new(
            Int32Array::from(vec![Some(1), Some(0), None, Some(1)]),
            Arc::new(BinaryArray::from(vec![wires[0].as_slice(), wires[1].as_slice()])),
        )
        .expect("dictionary");
        let out = conv
            .convert(&chunk(vec![("u", Arc::new(dictionary) as ArrayRef)]))
            .expect("dictionary carrier");
        assert_eq!(members(&out, 0), vec![1_u64 << 36]);
        assert_eq!(members(&out, 1), vec![3, 9]);
        assert!(out.columns()[0].is_null(2));
        assert_eq!(members(&out, 3), vec![1_u64 << 36]);

        let view = BinaryViewArray::from(vec![Some(wires[0].as_slice()), None]);
        let out = conv
            .convert(&chunk(vec![("u", Arc::new(view) as ArrayRef)]))
            .expect("view carrier");
        assert_eq!(members(&out, 0), vec![3, 9]);
        assert!(out.columns()[0].is_null(1));

        let err = conv
            .convert(&chunk(vec![("u", Arc::new(Int32Array::from(vec![1])) as ArrayRef)]))
            .expect_err("integers are not serialized objects");
        assert_eq!(err.kind, PushErrorKind::SchemaMismatch);
    }

    #[test]
    fn malformed_objects_fail_the_chunk() {
        let conv = converter(vec![TabletColumn::new("u", LogicalType::Bitmap, true)]);
        let err = conv
            .convert(&chunk(vec![(
                "u",
                Arc::new(BinaryArray::from(vec![&[2_u8, 0xff][..]])) as ArrayRef,
            )]))
            .expect_err("malformed bitmap");
        assert_eq!(err.kind, PushErrorKind::DataCorruption);

        let conv = converter(vec![TabletColumn::new("h", LogicalType::Hll, true)]);
        let err = conv
            .convert(&chunk(vec![(
                "h",
                Arc::new(BinaryArray::from(vec![&[9_u8][..]])) as ArrayRef,
            )]))
            .expect_err("malformed hll");
        assert_eq!(err.kind, PushErrorKind::DataCorruption);
    }

    #[test]
    fn hll_is_stored_in_internal_encoding() {
        let mut hll = HyperLogLog::new();
        for i in 0..10_u64 {
            hll.update_with_bytes(&i.to_le_bytes());
        }
        let wire = hll.serialize();
        let conv = converter(vec![TabletColumn::new("h", LogicalType::Hll, false)]);
        let out = conv
            .convert(&chunk(vec![(
                "h",
                Arc::new(BinaryArray::from(vec![wire.as_slice()])) as ArrayRef,
            )]))
            .expect("convert");
        let stored = out.columns()[0].as_binary::<i32>().value(0).to_vec();
        let decoded = HyperLogLog::deserialize(&stored).expect("decode");
        assert_eq!(decoded.estimate_cardinality(), hll.estimate_cardinality());
    }
}
