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
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;

use crate::common::config::{push_max_rowset_rows, push_segment_compression};
use crate::common::ids::{RowsetId, TabletId, Version};
use crate::common::status::{PushError, PushResult, PushStage};
use crate::exec::chunk::{Chunk, record_batch_bytes};
use crate::novarocks_push_logging::{debug, warn};
use crate::storage::tablet::Tablet;

pub const DATA_DIR: &str = "data";

const SEGMENT_CREATE_RETRIES: usize = 3;

#[derive(Debug)]
enum RowsetData {
    Memory(Vec<RecordBatch>),
    Segment(PathBuf),
}

/// A sealed, immutable batch of rows bound to one (tablet, version).
#[derive(Debug)]
pub struct Rowset {
    rowset_id: RowsetId,
    tablet_id: TabletId,
    version: Version,
    schema: SchemaRef,
    num_rows: usize,
    data_size: u64,
    data: RowsetData,
}

pub type RowsetSharedPtr = Arc<Rowset>;

impl Rowset {
    pub fn rowset_id(&self) -> RowsetId {
        self.rowset_id
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Segment file size when persisted, logical Arrow bytes otherwise.
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn segment_path(&self) -> Option<&Path> {
        match &self.data {
            RowsetData::Segment(path) => Some(path.as_path()),
            RowsetData::Memory(_) => None,
        }
    }

    /// Materialize the rows of this rowset in storage order.
    pub fn read_batches(&self) -> Result<Vec<RecordBatch>, String> {
        match &self.data {
            RowsetData::Memory(batches) => Ok(batches.clone()),
            RowsetData::Segment(path) => read_segment_file(path),
        }
    }

    /// Drop a sealed rowset that never became visible, removing its segment.
    pub fn discard(self) {
        if let RowsetData::Segment(path) = &self.data
            && let Err(e) = fs::remove_file(path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(
                tablet_id = self.tablet_id,
                version = self.version,
                "remove discarded segment {} failed: {}",
                path.display(),
                e
            );
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BuilderState {
    Open,
    Committed,
    Aborted,
}

/// Accumulates schema-conformant chunks for one (tablet, version).
///
/// Chunks are kept in arrival order; the source already sorted the rows in
/// the tablet's storage order. Dropping a builder that was neither committed
/// nor aborted aborts it.
pub struct RowsetBuilder {
    tablet: Arc<Tablet>,
    version: Version,
    rowset_id: RowsetId,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    num_rows: usize,
    max_rows: Option<usize>,
    state: BuilderState,
}

impl RowsetBuilder {
    pub fn begin(tablet: Arc<Tablet>, version: Version) -> PushResult<Self> {
        if version <= 0 {
            return Err(PushError::internal_abort(
                PushStage::Open,
                format!("rowset version must be positive, got {version}"),
            )
            .with_tablet(tablet.tablet_id()));
        }
        if tablet.has_version(version)? {
            return Err(PushError::version_conflict(
                PushStage::Open,
                tablet.tablet_id(),
                version,
            ));
        }
        let schema = tablet.schema().arrow_schema();
        Ok(Self {
            tablet,
            version,
            rowset_id: RowsetId::next(),
            schema,
            batches: Vec::new(),
            num_rows: 0,
            max_rows: push_max_rowset_rows(),
            state: BuilderState::Open,
        })
    }

    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet.tablet_id()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn error(&self, stage: PushStage, message: impl Into<String>) -> PushError {
        PushError::internal_abort(stage, message)
            .with_tablet(self.tablet.tablet_id())
            .with_version(self.version)
    }

    fn ensure_open(&self, stage: PushStage) -> PushResult<()> {
        match self.state {
            BuilderState::Open => Ok(()),
            BuilderState::Committed => Err(self.error(stage, "rowset builder already committed")),
            BuilderState::Aborted => Err(self.error(stage, "rowset builder already aborted")),
        }
    }

    pub fn add_chunk(&mut self, chunk: Chunk) -> PushResult<()> {
        self.ensure_open(PushStage::Append)?;
        if chunk.is_empty() {
            return Ok(());
        }
        check_conforms(self.schema.as_ref(), chunk.schema().as_ref())
            .map_err(|e| self.error(PushStage::Append, e))?;
        let rows = chunk.len();
        let total = self.num_rows.saturating_add(rows);
        if let Some(max_rows) = self.max_rows
            && total > max_rows
        {
            return Err(self.error(
                PushStage::Append,
                format!("rowset exceeds max_rowset_rows: rows={total} limit={max_rows}"),
            ));
        }
        let batch = RecordBatch::try_new(self.schema.clone(), chunk.into_batch().columns().to_vec())
            .map_err(|e| self.error(PushStage::Append, format!("rebuild chunk failed: {e}")))?;
        self.batches.push(batch);
        self.num_rows = total;
        debug!(
            tablet_id = self.tablet.tablet_id(),
            version = self.version,
            rows,
            total_rows = total,
            "rowset builder appended chunk"
        );
        Ok(())
    }

    /// Seal the accumulated rows. The rowset is not visible until it is
    /// attached to the tablet.
    pub fn commit(&mut self) -> PushResult<Rowset> {
        self.ensure_open(PushStage::Commit)?;
        let batches = std::mem::take(&mut self.batches);
        let logical_bytes = batches
            .iter()
            .map(|b| record_batch_bytes(b) as u64)
            .sum::<u64>();
        let (data, data_size) = match self.tablet.root_path() {
            Some(root) => {
                let (rowset_id, path, file) =
                    match create_segment_file(root, self.rowset_id, self.version) {
                        Ok(created) => created,
                        Err(e) => {
                            self.state = BuilderState::Aborted;
                            return Err(self.error(PushStage::Commit, e));
                        }
                    };
                self.rowset_id = rowset_id;
                let size = match write_segment_file(file, &path, self.schema.clone(), &batches) {
                    Ok(size) => size,
                    Err(e) => {
                        // Only reached for a file this builder created.
                        if let Err(rm) = fs::remove_file(&path) {
                            warn!(
                                tablet_id = self.tablet.tablet_id(),
                                version = self.version,
                                "remove partial segment {} failed: {}",
                                path.display(),
                                rm
                            );
                        }
                        self.state = BuilderState::Aborted;
                        return Err(self.error(PushStage::Commit, e));
                    }
                };
                (RowsetData::Segment(path), size)
            }
            None => (RowsetData::Memory(batches), logical_bytes),
        };
        self.state = BuilderState::Committed;
        Ok(Rowset {
            rowset_id: self.rowset_id,
            tablet_id: self.tablet.tablet_id(),
            version: self.version,
            schema: self.schema.clone(),
            num_rows: self.num_rows,
            data_size,
            data,
        })
    }

    pub fn abort(&mut self) {
        if self.state != BuilderState::Open {
            return;
        }
        self.batches.clear();
        self.num_rows = 0;
        self.state = BuilderState::Aborted;
        debug!(
            tablet_id = self.tablet.tablet_id(),
            version = self.version,
            rowset_id = %self.rowset_id,
            "rowset builder aborted"
        );
    }
}

impl Drop for RowsetBuilder {
    fn drop(&mut self) {
        self.abort();
    }
}

fn check_conforms(expected: &Schema, actual: &Schema) -> Result<(), String> {
    if expected.fields().len() != actual.fields().len() {
        return Err(format!(
            "chunk has {} columns, tablet schema has {}",
            actual.fields().len(),
            expected.fields().len()
        ));
    }
    for (idx, (want, got)) in expected.fields().iter().zip(actual.fields()).enumerate() {
        if want.name() != got.name()
            || want.data_type() != got.data_type()
            || want.is_nullable() != got.is_nullable()
        {
            return Err(format!(
                "chunk column #{idx} does not match tablet schema: expected {}:{:?}:nullable={} got {}:{:?}:nullable={}",
                want.name(),
                want.data_type(),
                want.is_nullable(),
                got.name(),
                got.data_type(),
                got.is_nullable()
            ));
        }
    }
    Ok(())
}

/// `{root}/data/{rowset_id}_{pid}_{version}.parquet`. Rowset ids restart
/// with the process, so the pid keeps names from different runs apart.
pub fn segment_file_path(root: &Path, rowset_id: RowsetId, version: Version) -> PathBuf {
    root.join(DATA_DIR).join(format!(
        "{rowset_id}_{:x}_{version}.parquet",
        std::process::id()
    ))
}

/// Create a segment file that did not exist before, allocating a fresh
/// rowset id whenever the name is already taken.
fn create_segment_file(
    root: &Path,
    rowset_id: RowsetId,
    version: Version,
) -> Result<(RowsetId, PathBuf, File), String> {
    let dir = root.join(DATA_DIR);
    fs::create_dir_all(&dir).map_err(|e| format!("create segment dir failed: {}", e))?;
    let mut rowset_id = rowset_id;
    let mut attempts = 0;
    loop {
        let path = segment_file_path(root, rowset_id, version);
        let file = OpenOptions::new().create_new(true).write(true).open(&path);
        match file {
            Ok(file) => return Ok((rowset_id, path, file)),
            Err(err)
                if err.kind() == ErrorKind::AlreadyExists
                    && attempts < SEGMENT_CREATE_RETRIES =>
            {
                debug!(
                    version,
                    "segment file {} already exists, allocating a new rowset id",
                    path.display()
                );
                attempts += 1;
                rowset_id = RowsetId::next();
            }
            Err(err) => {
                return Err(format!(
                    "create segment file {} failed: {err}",
                    path.display()
                ));
            }
        }
    }
}

fn write_segment_file(
    file: File,
    path: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
) -> Result<u64, String> {
    let props = WriterProperties::builder()
        .set_compression(push_segment_compression())
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .map_err(|e| format!("create segment writer failed: {}", e))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| format!("write segment batch failed: {}", e))?;
    }
    writer
        .close()
        .map_err(|e| format!("close segment writer failed: {}", e))?;
    let meta = fs::metadata(path).map_err(|e| format!("stat segment failed: {}", e))?;
    Ok(meta.len())
}

fn read_segment_file(path: &Path) -> Result<Vec<RecordBatch>, String> {
    let file = File::open(path).map_err(|e| format!("open segment failed: {}", e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| format!("create segment reader failed: {}", e))?
        .build()
        .map_err(|e| format!("build segment reader failed: {}", e))?;
    reader
        .map(|batch| batch.map_err(|e| format!("read segment batch failed: {}", e)))
        .collect()
}
