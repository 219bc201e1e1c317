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
//! Record sources feeding a push load.
//!
//! A source yields chunks already sorted in the tablet's storage order; the
//! staging job guarantees the order, so nothing downstream sorts.
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::file::reader::ChunkReader;

use crate::common::config::push_source_batch_size;
use crate::common::status::{PushError, PushResult, PushStage};
use crate::exec::chunk::{Chunk, normalize_column_name};
use crate::novarocks_push_logging::debug;
use crate::storage::push::request::{PushTarget, PushType, SourceDescriptor};

/// Pull-based stream of source chunks.
///
/// `next_chunk` returns `Ok(None)` at end of stream and keeps returning it
/// afterwards. Every failure is `InputUnavailable` and is not retried.
pub trait RecordSource: Send {
    fn init(&mut self, desc: &SourceDescriptor) -> PushResult<()>;

    fn next_chunk(&mut self) -> PushResult<Option<Chunk>>;

    /// Release resources. Safe to call at any time and more than once.
    fn close(&mut self);
}

/// Builds the source for one push target.
pub trait RecordSourceFactory: Send + Sync {
    fn create(
        &self,
        push_type: PushType,
        target: &PushTarget,
    ) -> PushResult<Box<dyn RecordSource>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ParquetSourceFactory;

impl RecordSourceFactory for ParquetSourceFactory {
    fn create(
        &self,
        push_type: PushType,
        _target: &PushTarget,
    ) -> PushResult<Box<dyn RecordSource>> {
        Ok(Box::new(ParquetRecordSource::new(push_type)))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SourceState {
    Created,
    Open,
    Eos,
    Closed,
}

fn read_error(message: impl Into<String>) -> PushError {
    PushError::input_unavailable(PushStage::Read, message)
}

/// Reads staged parquet files.
///
/// `Raw` streams the single local file; `Broker` loads each listed file into
/// memory and decodes the files back to back.
pub struct ParquetRecordSource {
    push_type: PushType,
    batch_size: usize,
    files: VecDeque<PathBuf>,
    columns: Vec<String>,
    current: Option<(PathBuf, ParquetRecordBatchReader)>,
    state: SourceState,
}

impl ParquetRecordSource {
    pub fn new(push_type: PushType) -> Self {
        Self {
            push_type,
            batch_size: push_source_batch_size(),
            files: VecDeque::new(),
            columns: Vec::new(),
            current: None,
            state: SourceState::Created,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn open_next_reader(&mut self) -> PushResult<bool> {
        let Some(path) = self.files.pop_front() else {
            return Ok(false);
        };
        let reader = match self.push_type {
            PushType::Raw => {
                let file = fs::File::open(&path)
                    .map_err(|e| read_error(format!("open {} failed: {}", path.display(), e)))?;
                self.build_reader(file)
            }
            PushType::Broker => {
                let data = fs::read(&path)
                    .map_err(|e| read_error(format!("read {} failed: {}", path.display(), e)))?;
                self.build_reader(Bytes::from(data))
            }
        }
        .map_err(|e| read_error(format!("{}: {}", path.display(), e)))?;
        debug!(
            push_type = %self.push_type,
            batch_size = self.batch_size,
            "opened source file {}",
            path.display()
        );
        self.current = Some((path, reader));
        Ok(true)
    }

    fn build_reader<T: ChunkReader + 'static>(
        &self,
        input: T,
    ) -> Result<ParquetRecordBatchReader, String> {
        let mut builder =
            ParquetRecordBatchReaderBuilder::try_new(input).map_err(|e| e.to_string())?;
        builder = builder.with_batch_size(self.batch_size);
        if !self.columns.is_empty() {
            let mask = {
                let arrow_schema = builder.schema();
                let mut indices = Vec::with_capacity(self.columns.len());
                for name in &self.columns {
                    let idx = arrow_schema
                        .fields()
                        .iter()
                        .position(|f| normalize_column_name(f.name()) == *name)
                        .ok_or_else(|| format!("source file does not provide column {}", name))?;
                    indices.push(idx);
                }
                ProjectionMask::roots(builder.parquet_schema(), indices)
            };
            builder = builder.with_projection(mask);
        }
        builder.build().map_err(|e| e.to_string())
    }

    /// Projection keeps file order; put columns back in source schema order.
    fn reorder(&self, batch: RecordBatch) -> Result<RecordBatch, String> {
        if self.columns.is_empty() {
            return Ok(batch);
        }
        let schema = batch.schema();
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let idx = schema
                .fields()
                .iter()
                .position(|f| normalize_column_name(f.name()) == *name)
                .ok_or_else(|| format!("source file does not provide column {}", name))?;
            fields.push(schema.field(idx).clone());
            arrays.push(Arc::clone(batch.column(idx)));
        }
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).map_err(|e| e.to_string())
    }
}

impl RecordSource for ParquetRecordSource {
    fn init(&mut self, desc: &SourceDescriptor) -> PushResult<()> {
        if self.state != SourceState::Created {
            return Err(PushError::internal_abort(
                PushStage::Open,
                "parquet source initialized twice",
            ));
        }
        if self.push_type == PushType::Raw && desc.files.len() != 1 {
            return Err(PushError::input_unavailable(
                PushStage::Open,
                format!("raw push expects exactly one file, got {}", desc.files.len()),
            ));
        }
        self.files = desc.files.iter().cloned().collect();
        self.columns = desc
            .schema
            .columns
            .iter()
            .map(|c| normalize_column_name(c))
            .collect();
        self.state = SourceState::Open;
        Ok(())
    }

    fn next_chunk(&mut self) -> PushResult<Option<Chunk>> {
        match self.state {
            SourceState::Open => {}
            SourceState::Eos => return Ok(None),
            SourceState::Created => {
                return Err(PushError::internal_abort(
                    PushStage::Read,
                    "parquet source read before init",
                ));
            }
            SourceState::Closed => return Err(read_error("parquet source already closed")),
        }
        loop {
            if self.current.is_none() && !self.open_next_reader()? {
                self.state = SourceState::Eos;
                return Ok(None);
            }
            let Some((path, reader)) = self.current.as_mut() else {
                continue;
            };
            match reader.next() {
                Some(Ok(batch)) => {
                    if batch.num_rows() == 0 {
                        continue;
                    }
                    let path = path.display().to_string();
                    let batch = self
                        .reorder(batch)
                        .map_err(|e| read_error(format!("{path}: {e}")))?;
                    return Chunk::try_new(batch)
                        .map(Some)
                        .map_err(|e| read_error(format!("{path}: {e}")));
                }
                Some(Err(e)) => {
                    let msg = format!("decode {} failed: {}", path.display(), e);
                    self.current = None;
                    return Err(read_error(msg));
                }
                None => self.current = None,
            }
        }
    }

    fn close(&mut self) {
        self.current = None;
        self.files.clear();
        self.state = SourceState::Closed;
    }
}

/// Serves pre-built chunks, optionally failing before the chunk at
/// `fail_at` (0-based) is delivered.
pub struct MemoryRecordSource {
    chunks: VecDeque<Chunk>,
    delivered: usize,
    fail_at: Option<usize>,
    initialized: bool,
    closed: bool,
}

impl MemoryRecordSource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: chunks.into(),
            delivered: 0,
            fail_at: None,
            initialized: false,
            closed: false,
        }
    }

    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl RecordSource for MemoryRecordSource {
    fn init(&mut self, _desc: &SourceDescriptor) -> PushResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn next_chunk(&mut self) -> PushResult<Option<Chunk>> {
        if !self.initialized {
            return Err(PushError::internal_abort(
                PushStage::Read,
                "memory source read before init",
            ));
        }
        if self.closed {
            return Err(read_error("memory source already closed"));
        }
        if self.fail_at == Some(self.delivered) && !self.chunks.is_empty() {
            return Err(read_error(format!(
                "memory source failed before chunk {}",
                self.delivered
            )));
        }
        let chunk = self.chunks.pop_front();
        if chunk.is_some() {
            self.delivered += 1;
        }
        Ok(chunk)
    }

    fn close(&mut self) {
        self.chunks.clear();
        self.closed = true;
    }
}
