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
use std::path::PathBuf;

use crate::common::ids::{RowsetId, TabletId, Version};
use crate::common::status::{PushError, PushErrorKind, PushResult, PushStage};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PushType {
    /// One locally staged file per tablet.
    Raw,
    /// Ordered file ranges fetched through a broker.
    Broker,
}

impl PushType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Broker => "broker",
        }
    }
}

impl fmt::Display for PushType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column names the staged files are expected to provide, in source order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SourceSchema {
    pub columns: Vec<String>,
}

impl SourceSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourceDescriptor {
    pub files: Vec<PathBuf>,
    pub schema: SourceSchema,
}

#[derive(Clone, Debug)]
pub struct PushTarget {
    pub tablet_id: TabletId,
    pub source: SourceDescriptor,
}

#[derive(Clone, Debug)]
pub struct PushRequest {
    pub table_id: i64,
    pub txn_id: i64,
    pub version: Version,
    pub push_type: PushType,
    pub targets: Vec<PushTarget>,
}

impl PushRequest {
    pub(crate) fn validate(&self) -> PushResult<()> {
        let invalid =
            |msg: String| Err(PushError::internal_abort(PushStage::Validate, msg).with_version(self.version));
        if self.targets.is_empty() {
            return invalid(format!("push request txn_id={} has no targets", self.txn_id));
        }
        if self.version <= 0 {
            return invalid(format!(
                "push request txn_id={} has non-positive version {}",
                self.txn_id, self.version
            ));
        }
        let mut seen = HashSet::with_capacity(self.targets.len());
        for target in &self.targets {
            if target.tablet_id <= 0 {
                return invalid(format!("invalid tablet_id: {}", target.tablet_id));
            }
            if !seen.insert(target.tablet_id) {
                return invalid(format!(
                    "push request targets tablet {} more than once",
                    target.tablet_id
                ));
            }
            if self.push_type == PushType::Raw && target.source.files.len() != 1 {
                return Err(PushError::input_unavailable(
                    PushStage::Validate,
                    format!(
                        "raw push expects exactly one file, got {}",
                        target.source.files.len()
                    ),
                )
                .with_tablet(target.tablet_id)
                .with_version(self.version));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadStatus {
    Ok,
    Failed(PushErrorKind),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TabletLoadResult {
    pub tablet_id: TabletId,
    pub version: Version,
    pub row_count: usize,
    pub byte_count: u64,
    pub status: LoadStatus,
    pub rowset_id: Option<RowsetId>,
    pub is_shadow: bool,
}

impl TabletLoadResult {
    pub(crate) fn failed(
        tablet_id: TabletId,
        version: Version,
        kind: PushErrorKind,
        is_shadow: bool,
    ) -> Self {
        Self {
            tablet_id,
            version,
            row_count: 0,
            byte_count: 0,
            status: LoadStatus::Failed(kind),
            rowset_id: None,
            is_shadow,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == LoadStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(tablet_id: TabletId, files: usize) -> PushTarget {
        PushTarget {
            tablet_id,
            source: SourceDescriptor {
                files: (0..files).map(|i| PathBuf::from(format!("f{i}.parquet"))).collect(),
                schema: SourceSchema::new(["a"]),
            },
        }
    }

    fn request(push_type: PushType, targets: Vec<PushTarget>) -> PushRequest {
        PushRequest {
            table_id: 1,
            txn_id: 7,
            version: 2,
            push_type,
            targets,
        }
    }

    #[test]
    fn validate_request_shape() {
        assert!(request(PushType::Raw, vec![target(1, 1)]).validate().is_ok());
        assert!(request(PushType::Broker, vec![target(1, 3)]).validate().is_ok());
        assert!(request(PushType::Raw, vec![]).validate().is_err());

        let err = request(PushType::Raw, vec![target(1, 2)])
            .validate()
            .expect_err("raw with two files");
        assert_eq!(err.kind, PushErrorKind::InputUnavailable);
        assert_eq!(err.tablet_id, Some(1));

        let err = request(PushType::Broker, vec![target(1, 1), target(1, 1)])
            .validate()
            .expect_err("duplicate tablet");
        assert_eq!(err.stage, PushStage::Validate);

        let mut req = request(PushType::Raw, vec![target(1, 1)]);
        req.version = 0;
        assert!(req.validate().is_err());
    }
}
