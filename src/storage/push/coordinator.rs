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
//! Fan-out of one source stream to the base tablet and, during a schema
//! change, to its shadow tablet.
use std::fmt;

use crate::common::ids::{TabletId, Version};
use crate::common::status::{PushError, PushResult, PushStage};
use crate::exec::chunk::Chunk;
use crate::novarocks_push_logging::{debug, warn};
use crate::storage::push::converter::ChunkConverter;
use crate::storage::rowset::{Rowset, RowsetBuilder};
use crate::storage::tablet::TabletVariant;

/// Destination of converted chunks.
pub trait ChunkSink: Send {
    fn add_chunk(&mut self, chunk: Chunk) -> PushResult<()>;

    fn commit(&mut self) -> PushResult<Rowset>;

    fn abort(&mut self);
}

impl ChunkSink for RowsetBuilder {
    fn add_chunk(&mut self, chunk: Chunk) -> PushResult<()> {
        RowsetBuilder::add_chunk(self, chunk)
    }

    fn commit(&mut self) -> PushResult<Rowset> {
        RowsetBuilder::commit(self)
    }

    fn abort(&mut self) {
        RowsetBuilder::abort(self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadMode {
    Single,
    Paired,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Paired => f.write_str("paired"),
        }
    }
}

/// A converter and the sink it feeds, for one tablet.
pub struct SinkLane {
    tablet_id: TabletId,
    converter: ChunkConverter,
    sink: Box<dyn ChunkSink>,
}

impl SinkLane {
    pub fn new(tablet_id: TabletId, converter: ChunkConverter, sink: Box<dyn ChunkSink>) -> Self {
        Self {
            tablet_id,
            converter,
            sink,
        }
    }

    fn push(&mut self, chunk: &Chunk) -> PushResult<usize> {
        let converted = self
            .converter
            .convert(chunk)
            .map_err(|e| e.with_tablet(self.tablet_id))?;
        let rows = converted.len();
        self.sink
            .add_chunk(converted)
            .map_err(|e| e.with_tablet(self.tablet_id))?;
        Ok(rows)
    }
}

#[derive(Debug)]
pub struct SealedRowset {
    pub rowset: Rowset,
    pub is_shadow: bool,
}

/// Drives one or two lanes in lock step.
///
/// Any failure aborts every lane, and rowsets already sealed by `commit` are
/// discarded before the error is returned.
pub struct SchemaVariantCoordinator {
    mode: LoadMode,
    base: SinkLane,
    shadow: Option<SinkLane>,
    finished: bool,
}

impl SchemaVariantCoordinator {
    pub fn from_lanes(base: SinkLane, shadow: Option<SinkLane>) -> Self {
        let mode = if shadow.is_some() {
            LoadMode::Paired
        } else {
            LoadMode::Single
        };
        Self {
            mode,
            base,
            shadow,
            finished: false,
        }
    }

    /// Begin a rowset on every tablet of `variant` at `version`.
    pub fn open(variant: &TabletVariant, version: Version) -> PushResult<Self> {
        let base = variant.base();
        let base_lane = SinkLane::new(
            base.tablet_id(),
            ChunkConverter::new(base.schema().clone()),
            Box::new(RowsetBuilder::begin(base.clone(), version)?),
        );
        let shadow_lane = match variant.shadow() {
            Some(shadow) => Some(SinkLane::new(
                shadow.tablet_id(),
                ChunkConverter::new(shadow.schema().clone()),
                Box::new(RowsetBuilder::begin(shadow.clone(), version)?),
            )),
            None => None,
        };
        Ok(Self::from_lanes(base_lane, shadow_lane))
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn push_chunk(&mut self, chunk: Chunk) -> PushResult<()> {
        if self.finished {
            return Err(PushError::internal_abort(
                PushStage::Append,
                "coordinator already finished",
            )
            .with_tablet(self.base.tablet_id));
        }
        let result = self.push_all(&chunk);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn push_all(&mut self, chunk: &Chunk) -> PushResult<()> {
        let base_rows = self.base.push(chunk)?;
        if let Some(shadow) = self.shadow.as_mut() {
            let shadow_rows = shadow.push(chunk)?;
            debug!(
                base_tablet_id = self.base.tablet_id,
                shadow_tablet_id = shadow.tablet_id,
                base_rows,
                shadow_rows,
                "chunk written to both tablets"
            );
        }
        Ok(())
    }

    /// Seal every lane. Either all lanes yield a rowset or none does.
    pub fn commit(&mut self) -> PushResult<Vec<SealedRowset>> {
        if self.finished {
            return Err(PushError::internal_abort(
                PushStage::Commit,
                "coordinator already finished",
            )
            .with_tablet(self.base.tablet_id));
        }
        self.finished = true;
        let base = match self.base.sink.commit() {
            Ok(rowset) => rowset,
            Err(e) => {
                self.abort_lanes();
                return Err(e.with_tablet(self.base.tablet_id));
            }
        };
        let mut sealed = vec![SealedRowset {
            rowset: base,
            is_shadow: false,
        }];
        if let Some(shadow) = self.shadow.as_mut() {
            match shadow.sink.commit() {
                Ok(rowset) => sealed.push(SealedRowset {
                    rowset,
                    is_shadow: true,
                }),
                Err(e) => {
                    let tablet_id = shadow.tablet_id;
                    shadow.sink.abort();
                    sealed.into_iter().for_each(|s| s.rowset.discard());
                    warn!(
                        base_tablet_id = self.base.tablet_id,
                        shadow_tablet_id = tablet_id,
                        "shadow commit failed, base rowset discarded: {}",
                        e
                    );
                    return Err(e.with_tablet(tablet_id));
                }
            }
        }
        Ok(sealed)
    }

    pub fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.abort_lanes();
    }

    fn abort_lanes(&mut self) {
        self.base.sink.abort();
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.sink.abort();
        }
    }
}

impl Drop for SchemaVariantCoordinator {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::status::PushErrorKind;
    use crate::storage::schema::{LogicalType, TabletColumn, TabletSchema};
    use crate::storage::tablet::{Tablet, TabletManager};
    use arrow::array::{ArrayRef, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn schema() -> TabletSchema {
        TabletSchema::try_new(1, vec![TabletColumn::new("a", LogicalType::Int, true)])
            .expect("schema")
    }

    fn source_chunk(values: Vec<i32>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        Chunk::try_new(
            RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values)) as ArrayRef])
                .expect("batch"),
        )
        .expect("chunk")
    }

    struct FailingSink {
        fail_at: usize,
        seen: usize,
        aborted: Arc<AtomicUsize>,
    }

    impl ChunkSink for FailingSink {
        fn add_chunk(&mut self, _chunk: Chunk) -> PushResult<()> {
            self.seen += 1;
            if self.seen == self.fail_at {
                return Err(PushError::internal_abort(PushStage::Append, "injected"));
            }
            Ok(())
        }

        fn commit(&mut self) -> PushResult<Rowset> {
            Err(PushError::internal_abort(PushStage::Commit, "injected"))
        }

        fn abort(&mut self) {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn single_mode_writes_one_rowset() {
        let mgr = TabletManager::new();
        mgr.create_tablet(Tablet::new(1, schema())).expect("tablet");
        let variant = mgr.resolve_variant(1).expect("variant");
        let mut coord = SchemaVariantCoordinator::open(&variant, 1).expect("open");
        assert_eq!(coord.mode(), LoadMode::Single);
        coord.push_chunk(source_chunk(vec![1, 2])).expect("push");
        let sealed = coord.commit().expect("commit");
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].rowset.num_rows(), 2);
        assert!(!sealed[0].is_shadow);
    }

    #[test]
    fn shadow_failure_aborts_both_lanes() {
        let mgr = TabletManager::new();
        let base = mgr.create_tablet(Tablet::new(1, schema())).expect("base");
        let aborted = Arc::new(AtomicUsize::new(0));
        let base_lane = SinkLane::new(
            1,
            ChunkConverter::new(schema()),
            Box::new(RowsetBuilder::begin(base, 3).expect("begin")),
        );
        let shadow_lane = SinkLane::new(
            2,
            ChunkConverter::new(schema()),
            Box::new(FailingSink {
                fail_at: 3,
                seen: 0,
                aborted: aborted.clone(),
            }),
        );
        let mut coord = SchemaVariantCoordinator::from_lanes(base_lane, Some(shadow_lane));
        assert_eq!(coord.mode(), LoadMode::Paired);
        coord.push_chunk(source_chunk(vec![1])).expect("first");
        coord.push_chunk(source_chunk(vec![2])).expect("second");
        let err = coord.push_chunk(source_chunk(vec![3])).expect_err("third");
        assert_eq!(err.kind, PushErrorKind::InternalAbort);
        assert_eq!(err.tablet_id, Some(2));
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
        assert!(coord.commit().is_err());
        drop(coord);
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shadow_commit_failure_discards_base_rowset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = TabletManager::new();
        let base = mgr
            .create_tablet(Tablet::new(1, schema()).with_root_path(dir.path()))
            .expect("base");
        let base_lane = SinkLane::new(
            1,
            ChunkConverter::new(schema()),
            Box::new(RowsetBuilder::begin(base, 2).expect("begin")),
        );
        let shadow_lane = SinkLane::new(
            2,
            ChunkConverter::new(schema()),
            Box::new(FailingSink {
                fail_at: usize::MAX,
                seen: 0,
                aborted: Arc::new(AtomicUsize::new(0)),
            }),
        );
        let mut coord = SchemaVariantCoordinator::from_lanes(base_lane, Some(shadow_lane));
        coord.push_chunk(source_chunk(vec![1, 2, 3])).expect("push");
        coord.commit().expect_err("shadow commit fails");
        let data_dir = dir.path().join(crate::storage::rowset::DATA_DIR);
        let leftover = std::fs::read_dir(&data_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
    }
}
