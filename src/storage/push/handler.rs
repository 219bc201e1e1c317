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
use std::time::Instant;

use crate::common::status::PushResult;
use crate::novarocks_push_logging::{debug, info, warn};
use crate::storage::push::coordinator::{SchemaVariantCoordinator, SealedRowset};
use crate::storage::push::request::{LoadStatus, PushRequest, PushTarget, TabletLoadResult};
use crate::storage::push::source::{ParquetSourceFactory, RecordSource, RecordSourceFactory};
use crate::storage::tablet::TabletManager;

/// Drives push requests against the tablets of one `TabletManager`.
///
/// Counters and results describe the most recent request only.
pub struct PushHandler {
    tablet_manager: Arc<TabletManager>,
    source_factory: Arc<dyn RecordSourceFactory>,
    write_rows: u64,
    write_bytes: u64,
    results: Vec<TabletLoadResult>,
}

impl PushHandler {
    pub fn new(tablet_manager: Arc<TabletManager>) -> Self {
        Self {
            tablet_manager,
            source_factory: Arc::new(ParquetSourceFactory),
            write_rows: 0,
            write_bytes: 0,
            results: Vec::new(),
        }
    }

    pub fn with_source_factory(mut self, factory: Arc<dyn RecordSourceFactory>) -> Self {
        self.source_factory = factory;
        self
    }

    /// Rows committed to base tablets by the last request.
    pub fn write_rows(&self) -> u64 {
        self.write_rows
    }

    pub fn write_bytes(&self) -> u64 {
        self.write_bytes
    }

    pub fn tablet_results(&self) -> &[TabletLoadResult] {
        &self.results
    }

    /// Load every target of `request` at `request.version`.
    ///
    /// Either every target tablet (and shadow tablet) gains the version or
    /// none does. The error is returned as raised by the failing stage.
    pub fn process_streaming_ingestion(
        &mut self,
        request: &PushRequest,
    ) -> PushResult<Vec<TabletLoadResult>> {
        self.write_rows = 0;
        self.write_bytes = 0;
        self.results.clear();
        let started = Instant::now();
        info!(
            table_id = request.table_id,
            txn_id = request.txn_id,
            version = request.version,
            push_type = %request.push_type,
            targets = request.targets.len(),
            "push load started"
        );

        match self.run(request) {
            Ok(results) => {
                for result in results.iter().filter(|r| !r.is_shadow) {
                    self.write_rows += result.row_count as u64;
                    self.write_bytes += result.byte_count;
                }
                info!(
                    txn_id = request.txn_id,
                    version = request.version,
                    rows = self.write_rows,
                    bytes = self.write_bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "push load finished"
                );
                self.results = results.clone();
                Ok(results)
            }
            Err(e) => {
                warn!(
                    txn_id = request.txn_id,
                    version = request.version,
                    "push load aborted: {}",
                    e
                );
                self.results = request
                    .targets
                    .iter()
                    .map(|t| TabletLoadResult::failed(t.tablet_id, request.version, e.kind, false))
                    .collect();
                Err(e)
            }
        }
    }

    fn run(&self, request: &PushRequest) -> PushResult<Vec<TabletLoadResult>> {
        request.validate()?;

        let mut sealed: Vec<SealedRowset> = Vec::new();
        for target in &request.targets {
            match self.load_target(request, target) {
                Ok(rowsets) => sealed.extend(rowsets),
                Err(e) => {
                    sealed.into_iter().for_each(|s| s.rowset.discard());
                    return Err(e
                        .with_tablet(target.tablet_id)
                        .with_version(request.version));
                }
            }
        }

        let shadow_flags = sealed.iter().map(|s| s.is_shadow).collect::<Vec<_>>();
        let attached = self
            .tablet_manager
            .attach_rowsets(sealed.into_iter().map(|s| s.rowset).collect())
            .map_err(|e| e.with_version(request.version))?;
        Ok(attached
            .iter()
            .zip(shadow_flags)
            .map(|(rowset, is_shadow)| TabletLoadResult {
                tablet_id: rowset.tablet_id(),
                version: rowset.version(),
                row_count: rowset.num_rows(),
                byte_count: rowset.data_size(),
                status: LoadStatus::Ok,
                rowset_id: Some(rowset.rowset_id()),
                is_shadow,
            })
            .collect())
    }

    fn load_target(
        &self,
        request: &PushRequest,
        target: &PushTarget,
    ) -> PushResult<Vec<SealedRowset>> {
        let variant = self.tablet_manager.resolve_variant(target.tablet_id)?;
        let mut coordinator = SchemaVariantCoordinator::open(&variant, request.version)?;
        info!(
            tablet_id = target.tablet_id,
            version = request.version,
            mode = %coordinator.mode(),
            shadow_tablet_id = variant.shadow().map(|t| t.tablet_id()),
            files = target.source.files.len(),
            "push target opened"
        );
        let mut source = self.source_factory.create(request.push_type, target)?;
        let result = drain_source(source.as_mut(), &mut coordinator, target);
        source.close();
        let sealed = result?;
        for s in &sealed {
            info!(
                tablet_id = s.rowset.tablet_id(),
                version = s.rowset.version(),
                rows = s.rowset.num_rows(),
                bytes = s.rowset.data_size(),
                shadow = s.is_shadow,
                "push target sealed"
            );
        }
        Ok(sealed)
    }
}

fn drain_source(
    source: &mut dyn RecordSource,
    coordinator: &mut SchemaVariantCoordinator,
    target: &PushTarget,
) -> PushResult<Vec<SealedRowset>> {
    source.init(&target.source)?;
    let mut chunks = 0usize;
    while let Some(chunk) = source.next_chunk()? {
        chunks += 1;
        debug!(
            tablet_id = target.tablet_id,
            chunk = chunks,
            rows = chunk.len(),
            "push source chunk"
        );
        coordinator.push_chunk(chunk)?;
    }
    coordinator.commit()
}
