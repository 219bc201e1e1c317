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
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use crate::common::ids::{TabletId, Version};
use crate::common::status::{PushError, PushResult, PushStage};
use crate::novarocks_push_logging::{debug, info};
use crate::storage::rowset::{Rowset, RowsetSharedPtr};
use crate::storage::schema::TabletSchema;

type VersionMap = BTreeMap<Version, RowsetSharedPtr>;

/// A horizontal shard of a table together with its visible rowsets.
#[derive(Debug)]
pub struct Tablet {
    tablet_id: TabletId,
    schema: TabletSchema,
    root_path: Option<PathBuf>,
    versions: Mutex<VersionMap>,
}

impl Tablet {
    pub fn new(tablet_id: TabletId, schema: TabletSchema) -> Self {
        Self {
            tablet_id,
            schema,
            root_path: None,
            versions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Persist committed rowsets as segment files under `root`.
    pub fn with_root_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_path = Some(root.into());
        self
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn schema(&self) -> &TabletSchema {
        &self.schema
    }

    pub fn root_path(&self) -> Option<&Path> {
        self.root_path.as_deref()
    }

    fn lock_versions(&self, stage: PushStage) -> PushResult<MutexGuard<'_, VersionMap>> {
        self.versions.lock().map_err(|_| {
            PushError::internal_abort(stage, "lock tablet version map failed")
                .with_tablet(self.tablet_id)
        })
    }

    /// Checked before a load opens its rowset builder.
    pub fn has_version(&self, version: Version) -> PushResult<bool> {
        Ok(self.lock_versions(PushStage::Open)?.contains_key(&version))
    }

    pub fn versions(&self) -> PushResult<Vec<Version>> {
        Ok(self.lock_versions(PushStage::Read)?.keys().copied().collect())
    }

    pub fn max_version(&self) -> PushResult<Option<Version>> {
        Ok(self.lock_versions(PushStage::Read)?.keys().next_back().copied())
    }

    pub fn rowset(&self, version: Version) -> PushResult<Option<RowsetSharedPtr>> {
        Ok(self.lock_versions(PushStage::Read)?.get(&version).cloned())
    }

    pub fn num_rows(&self) -> PushResult<usize> {
        Ok(self
            .lock_versions(PushStage::Read)?
            .values()
            .map(|r| r.num_rows())
            .sum())
    }
}

/// Which tablets a load into a base tablet must write.
#[derive(Clone, Debug)]
pub enum TabletVariant {
    Single(Arc<Tablet>),
    Paired {
        base: Arc<Tablet>,
        shadow: Arc<Tablet>,
    },
}

impl TabletVariant {
    pub fn base(&self) -> &Arc<Tablet> {
        match self {
            Self::Single(base) | Self::Paired { base, .. } => base,
        }
    }

    pub fn shadow(&self) -> Option<&Arc<Tablet>> {
        match self {
            Self::Single(_) => None,
            Self::Paired { shadow, .. } => Some(shadow),
        }
    }
}

/// Registry of tablets hosted by this node and of in-flight schema changes.
#[derive(Debug, Default)]
pub struct TabletManager {
    tablets: RwLock<HashMap<TabletId, Arc<Tablet>>>,
    // base tablet id -> shadow tablet id
    schema_changes: RwLock<HashMap<TabletId, TabletId>>,
}

impl TabletManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_tablet(&self, tablet: Tablet) -> Result<Arc<Tablet>, String> {
        if tablet.tablet_id <= 0 {
            return Err(format!("invalid tablet_id: {}", tablet.tablet_id));
        }
        let mut guard = self
            .tablets
            .write()
            .map_err(|_| "lock tablet map failed".to_string())?;
        if guard.contains_key(&tablet.tablet_id) {
            return Err(format!("tablet already exists: {}", tablet.tablet_id));
        }
        let tablet = Arc::new(tablet);
        guard.insert(tablet.tablet_id, Arc::clone(&tablet));
        info!(
            tablet_id = tablet.tablet_id,
            schema_id = tablet.schema.schema_id(),
            "tablet created"
        );
        Ok(tablet)
    }

    fn read_tablets(
        &self,
        stage: PushStage,
    ) -> PushResult<RwLockReadGuard<'_, HashMap<TabletId, Arc<Tablet>>>> {
        self.tablets
            .read()
            .map_err(|_| PushError::internal_abort(stage, "lock tablet map failed"))
    }

    fn read_schema_changes(
        &self,
        stage: PushStage,
    ) -> PushResult<RwLockReadGuard<'_, HashMap<TabletId, TabletId>>> {
        self.schema_changes
            .read()
            .map_err(|_| PushError::internal_abort(stage, "lock schema change map failed"))
    }

    fn find_tablet(
        &self,
        tablet_id: TabletId,
        stage: PushStage,
    ) -> PushResult<Option<Arc<Tablet>>> {
        Ok(self.read_tablets(stage)?.get(&tablet_id).cloned())
    }

    pub fn get_tablet(&self, tablet_id: TabletId) -> PushResult<Option<Arc<Tablet>>> {
        self.find_tablet(tablet_id, PushStage::Open)
    }

    pub fn drop_tablet(&self, tablet_id: TabletId) -> Result<(), String> {
        let altering = self
            .schema_changes
            .read()
            .map_err(|_| "lock schema change map failed".to_string())?
            .iter()
            .any(|(base, shadow)| *base == tablet_id || *shadow == tablet_id);
        if altering {
            return Err(format!(
                "tablet {tablet_id} is part of an in-flight schema change"
            ));
        }
        self.tablets
            .write()
            .map_err(|_| "lock tablet map failed".to_string())?
            .remove(&tablet_id)
            .map(|_| ())
            .ok_or_else(|| format!("tablet not found: {tablet_id}"))
    }

    /// Start routing loads into `base` to `shadow` as well.
    pub fn register_schema_change(
        &self,
        base_tablet_id: TabletId,
        shadow_tablet_id: TabletId,
    ) -> Result<(), String> {
        if base_tablet_id == shadow_tablet_id {
            return Err(format!(
                "schema change base and shadow are the same tablet: {base_tablet_id}"
            ));
        }
        for id in [base_tablet_id, shadow_tablet_id] {
            if self.get_tablet(id).map_err(|e| e.to_string())?.is_none() {
                return Err(format!("tablet not found: {id}"));
            }
        }
        let mut guard = self
            .schema_changes
            .write()
            .map_err(|_| "lock schema change map failed".to_string())?;
        if let Some(existing) = guard.get(&base_tablet_id) {
            return Err(format!(
                "tablet {base_tablet_id} already has shadow tablet {existing}"
            ));
        }
        if guard.contains_key(&shadow_tablet_id) || guard.values().any(|s| *s == shadow_tablet_id)
        {
            return Err(format!(
                "tablet {shadow_tablet_id} is already part of a schema change"
            ));
        }
        guard.insert(base_tablet_id, shadow_tablet_id);
        info!(
            base_tablet_id,
            shadow_tablet_id, "schema change registered"
        );
        Ok(())
    }

    /// Stop double-writing; returns the shadow tablet id that was registered.
    pub fn finish_schema_change(&self, base_tablet_id: TabletId) -> PushResult<Option<TabletId>> {
        let removed = self
            .schema_changes
            .write()
            .map_err(|_| {
                PushError::internal_abort(PushStage::Open, "lock schema change map failed")
                    .with_tablet(base_tablet_id)
            })?
            .remove(&base_tablet_id);
        if let Some(shadow_tablet_id) = removed {
            info!(
                base_tablet_id,
                shadow_tablet_id, "schema change finished"
            );
        }
        Ok(removed)
    }

    pub fn shadow_tablet_of(&self, base_tablet_id: TabletId) -> PushResult<Option<Arc<Tablet>>> {
        let shadow_id = self
            .read_schema_changes(PushStage::Open)
            .map_err(|e| e.with_tablet(base_tablet_id))?
            .get(&base_tablet_id)
            .copied();
        match shadow_id {
            Some(shadow_id) => self.get_tablet(shadow_id),
            None => Ok(None),
        }
    }

    /// Resolve the tablets a load into `base_tablet_id` writes. The answer is
    /// a snapshot; a schema change registered afterwards does not affect it.
    pub fn resolve_variant(&self, base_tablet_id: TabletId) -> PushResult<TabletVariant> {
        let base = self.get_tablet(base_tablet_id)?.ok_or_else(|| {
            PushError::internal_abort(
                PushStage::Open,
                format!("tablet not found: {base_tablet_id}"),
            )
            .with_tablet(base_tablet_id)
        })?;
        let shadow_id = self
            .read_schema_changes(PushStage::Open)
            .map_err(|e| e.with_tablet(base_tablet_id))?
            .get(&base_tablet_id)
            .copied();
        match shadow_id {
            None => Ok(TabletVariant::Single(base)),
            Some(shadow_id) => {
                let shadow = self.get_tablet(shadow_id)?.ok_or_else(|| {
                    PushError::internal_abort(
                        PushStage::Open,
                        format!("shadow tablet not found: {shadow_id}"),
                    )
                    .with_tablet(base_tablet_id)
                })?;
                Ok(TabletVariant::Paired { base, shadow })
            }
        }
    }

    /// Make every rowset visible, or none of them.
    ///
    /// Tablet version maps are locked in ascending tablet id order so that
    /// concurrent attaches over overlapping tablet sets cannot deadlock. On
    /// failure every rowset is discarded.
    pub fn attach_rowsets(&self, rowsets: Vec<Rowset>) -> PushResult<Vec<RowsetSharedPtr>> {
        match self.prepare_attach(&rowsets) {
            Ok(tablets) => self.attach_locked(&tablets, rowsets),
            Err(e) => {
                rowsets.into_iter().for_each(Rowset::discard);
                Err(e)
            }
        }
    }

    fn prepare_attach(&self, rowsets: &[Rowset]) -> PushResult<Vec<Arc<Tablet>>> {
        let mut ids = rowsets.iter().map(Rowset::tablet_id).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .map(|id| {
                self.find_tablet(id, PushStage::Attach)?.ok_or_else(|| {
                    PushError::internal_abort(PushStage::Attach, format!("tablet not found: {id}"))
                        .with_tablet(id)
                })
            })
            .collect()
    }

    fn attach_locked(
        &self,
        tablets: &[Arc<Tablet>],
        rowsets: Vec<Rowset>,
    ) -> PushResult<Vec<RowsetSharedPtr>> {
        let mut guards = Vec::with_capacity(tablets.len());
        for tablet in tablets {
            match tablet.lock_versions(PushStage::Attach) {
                Ok(guard) => guards.push((tablet.tablet_id, guard)),
                Err(e) => {
                    drop(guards);
                    rowsets.into_iter().for_each(Rowset::discard);
                    return Err(e);
                }
            }
        }

        let mut pending = HashSet::with_capacity(rowsets.len());
        let mut conflict = None;
        for rowset in &rowsets {
            let key = (rowset.tablet_id(), rowset.version());
            let visible = guards
                .iter()
                .find(|(id, _)| *id == key.0)
                .is_some_and(|(_, guard)| guard.contains_key(&key.1));
            if visible || !pending.insert(key) {
                conflict = Some(key);
                break;
            }
        }
        if let Some((tablet_id, version)) = conflict {
            drop(guards);
            rowsets.into_iter().for_each(Rowset::discard);
            return Err(PushError::version_conflict(
                PushStage::Attach,
                tablet_id,
                version,
            ));
        }

        let mut attached = Vec::with_capacity(rowsets.len());
        for rowset in rowsets {
            let rowset = Arc::new(rowset);
            if let Some((_, guard)) = guards.iter_mut().find(|(id, _)| *id == rowset.tablet_id()) {
                guard.insert(rowset.version(), Arc::clone(&rowset));
            }
            debug!(
                tablet_id = rowset.tablet_id(),
                version = rowset.version(),
                rowset_id = %rowset.rowset_id(),
                rows = rowset.num_rows(),
                "rowset attached"
            );
            attached.push(rowset);
        }
        Ok(attached)
    }
}
