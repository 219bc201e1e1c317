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
//! Common utilities and helpers for push integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{Array, ArrayRef, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

use novarocks_push::exec::chunk::Chunk;
use novarocks_push::novarocks_push_config;
use novarocks_push::storage::push::{
    MemoryRecordSource, PushRequest, PushTarget, PushType, RecordSource, RecordSourceFactory,
    SourceDescriptor, SourceSchema,
};
use novarocks_push::{LogicalType, PushResult, TabletColumn, TabletId, TabletSchema};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks_push.toml");

        let config_content = r#"
log_level = "debug"

[push]
source_batch_size = 64
max_rowset_rows = 0
segment_compression = "snappy"
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_push_config::PushConfig> {
        novarocks_push_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Tablet schema `{a INT NOT NULL, b CHAR(8) NULL}`.
pub fn int_char_schema(schema_id: i64) -> TabletSchema {
    TabletSchema::try_new(
        schema_id,
        vec![
            TabletColumn::new("a", LogicalType::Int, false).key(),
            TabletColumn::new("b", LogicalType::Char { len: 8 }, true),
        ],
    )
    .expect("build int/char schema")
}

pub fn ab_batch(a: Vec<Option<i32>>, b: Vec<Option<&str>>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int32, true),
        Field::new("b", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from(a)) as ArrayRef,
            Arc::new(StringArray::from(b)) as ArrayRef,
        ],
    )
    .expect("build source batch")
}

/// Source chunk with nullable `a INT` and `b VARCHAR` columns.
pub fn ab_chunk(a: Vec<Option<i32>>, b: Vec<Option<&str>>) -> Chunk {
    Chunk::try_new(ab_batch(a, b)).expect("build source chunk")
}

/// `rows` rows of `{a: 1, b: "hi"}`.
pub fn repeated_chunk(rows: usize) -> Chunk {
    ab_chunk(vec![Some(1); rows], vec![Some("hi"); rows])
}

/// Write `batches` into one parquet file at `path`.
pub fn write_parquet(path: &Path, batches: &[RecordBatch]) {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .expect("at least one batch");
    let file = std::fs::File::create(path).expect("create parquet fixture");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("create parquet writer");
    for batch in batches {
        writer.write(batch).expect("write parquet batch");
    }
    writer.close().expect("close parquet writer");
}

pub fn target(tablet_id: TabletId, files: Vec<PathBuf>) -> PushTarget {
    PushTarget {
        tablet_id,
        source: SourceDescriptor {
            files,
            schema: SourceSchema::new(["a", "b"]),
        },
    }
}

pub fn request(version: i64, push_type: PushType, targets: Vec<PushTarget>) -> PushRequest {
    PushRequest {
        table_id: 1001,
        txn_id: 2001 + version,
        version,
        push_type,
        targets,
    }
}

/// Hands out pre-built chunks per tablet; a tablet may fail before its
/// N-th chunk.
#[derive(Default)]
pub struct MemorySourceFactory {
    chunks: Mutex<HashMap<TabletId, Vec<Chunk>>>,
    failures: Mutex<HashMap<TabletId, usize>>,
}

impl MemorySourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(self, tablet_id: TabletId, chunks: Vec<Chunk>) -> Self {
        self.chunks
            .lock()
            .expect("lock chunks")
            .insert(tablet_id, chunks);
        self
    }

    pub fn failing_at(self, tablet_id: TabletId, index: usize) -> Self {
        self.failures
            .lock()
            .expect("lock failures")
            .insert(tablet_id, index);
        self
    }
}

impl RecordSourceFactory for MemorySourceFactory {
    fn create(
        &self,
        _push_type: PushType,
        target: &PushTarget,
    ) -> PushResult<Box<dyn RecordSource>> {
        let chunks = self
            .chunks
            .lock()
            .expect("lock chunks")
            .get(&target.tablet_id)
            .cloned()
            .unwrap_or_default();
        let mut source = MemoryRecordSource::new(chunks);
        if let Some(index) = self
            .failures
            .lock()
            .expect("lock failures")
            .get(&target.tablet_id)
            .copied()
        {
            source = source.fail_at(index);
        }
        Ok(Box::new(source))
    }
}

/// Concatenate one string column across batches.
pub fn string_values(batches: &[RecordBatch], column: usize) -> Vec<String> {
    batches
        .iter()
        .flat_map(|batch| {
            let col = batch
                .column(column)
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("string column");
            (0..col.len())
                .map(|i| col.value(i).to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}
