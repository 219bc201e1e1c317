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
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::buffer::Buffer;
use arrow::datatypes::{Schema, SchemaRef};

/// A chunk of data, consisting of multiple rows.
/// Thin wrapper around an Arrow RecordBatch with case-insensitive column lookup.
///
/// Chunks move between pipeline stages by value; a stage that needs to keep
/// the data builds a new chunk instead of aliasing the input.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    name_to_index: Arc<HashMap<String, usize>>,
}

impl Chunk {
    pub fn try_new(batch: RecordBatch) -> Result<Self, String> {
        let name_to_index = name_to_index_from_schema(batch.schema().as_ref())?;
        Ok(Self {
            batch,
            name_to_index: Arc::new(name_to_index),
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&normalize_column_name(name)).copied()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ArrayRef> {
        self.index_of(name).map(|idx| self.batch.column(idx))
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

/// Column names are matched case-insensitively, ignoring surrounding quotes.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .trim_matches('`')
        .trim_matches('"')
        .to_ascii_lowercase()
}

fn name_to_index_from_schema(schema: &Schema) -> Result<HashMap<String, usize>, String> {
    let mut map = HashMap::with_capacity(schema.fields().len());
    for (idx, f) in schema.fields().iter().enumerate() {
        let name = normalize_column_name(f.name());
        if name.is_empty() {
            return Err(format!("chunk schema field at index {} has empty name", idx));
        }
        if let Some(prev) = map.insert(name, idx) {
            return Err(format!(
                "duplicate column name in chunk schema: '{}' at index {} and {}",
                f.name(),
                prev,
                idx
            ));
        }
    }
    Ok(map)
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within one batch; slices sharing a buffer
/// across batches are counted once per batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};
    use std::sync::Arc;

    #[test]
    fn lookup_is_case_insensitive() {
        let schema = Arc::new(Schema::new(vec![Field::new("UserId", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2]))])
            .expect("record batch");
        let chunk = Chunk::try_new(batch).expect("chunk");
        assert_eq!(chunk.index_of("userid"), Some(0));
        assert_eq!(chunk.index_of("`USERID`"), Some(0));
        assert!(chunk.column_by_name("other").is_none());
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn rejects_duplicate_names() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("A", DataType::Int32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(Int32Array::from(vec![3, 4])),
            ],
        )
        .expect("record batch");
        let err = Chunk::try_new(batch).expect_err("expected duplicate error");
        assert!(err.contains("duplicate column name"), "err={}", err);
    }

    #[test]
    fn logical_bytes_counts_values() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))])
            .expect("record batch");
        let chunk = Chunk::try_new(batch).expect("chunk");
        assert_eq!(chunk.logical_bytes(), 12);
    }
}
