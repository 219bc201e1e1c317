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
//! Error status of the push ingestion path.
//!
//! Lower layers (codecs, arrow glue) report plain `String` errors; they are
//! classified into a [`PushErrorKind`] at the component boundary so the caller
//! can decide whether to re-issue the request.

use std::fmt;

use crate::common::ids::{TabletId, Version};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PushErrorKind {
    /// The external record source failed to open or read.
    InputUnavailable,
    /// A target column is missing from the source, or a non-nullable target
    /// column received nulls, or the source type cannot be cast.
    SchemaMismatch,
    /// Malformed BITMAP/HLL payload, or a value outside its declared range.
    DataCorruption,
    /// The requested version already exists on the tablet.
    VersionConflict,
    /// Builder-level failure during append or commit.
    InternalAbort,
}

impl PushErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputUnavailable => "INPUT_UNAVAILABLE",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::DataCorruption => "DATA_CORRUPTION",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::InternalAbort => "INTERNAL_ABORT",
        }
    }
}

impl fmt::Display for PushErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the load pipeline an error was raised.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PushStage {
    Validate,
    Open,
    Read,
    Convert,
    Append,
    Commit,
    Attach,
}

impl PushStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Open => "open",
            Self::Read => "read",
            Self::Convert => "convert",
            Self::Append => "append",
            Self::Commit => "commit",
            Self::Attach => "attach",
        }
    }
}

impl fmt::Display for PushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct PushError {
    pub kind: PushErrorKind,
    pub stage: PushStage,
    pub tablet_id: Option<TabletId>,
    pub version: Option<Version>,
    pub message: String,
}

pub type PushResult<T> = Result<T, PushError>;

impl PushError {
    pub fn new(kind: PushErrorKind, stage: PushStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            tablet_id: None,
            version: None,
            message: message.into(),
        }
    }

    pub fn input_unavailable(stage: PushStage, message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::InputUnavailable, stage, message)
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::SchemaMismatch, PushStage::Convert, message)
    }

    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::DataCorruption, PushStage::Convert, message)
    }

    pub fn version_conflict(stage: PushStage, tablet_id: TabletId, version: Version) -> Self {
        Self::new(
            PushErrorKind::VersionConflict,
            stage,
            format!("version {version} already exists on tablet {tablet_id}"),
        )
        .with_tablet(tablet_id)
        .with_version(version)
    }

    pub fn internal_abort(stage: PushStage, message: impl Into<String>) -> Self {
        Self::new(PushErrorKind::InternalAbort, stage, message)
    }

    /// Attach the tablet id unless an inner layer already recorded one.
    pub fn with_tablet(mut self, tablet_id: TabletId) -> Self {
        self.tablet_id.get_or_insert(tablet_id);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version.get_or_insert(version);
        self
    }

    pub fn kind(&self) -> PushErrorKind {
        self.kind
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind == PushErrorKind::VersionConflict
    }
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push {} failed ({})", self.stage, self.kind)?;
        if let Some(tablet_id) = self.tablet_id {
            write!(f, " tablet_id={tablet_id}")?;
        }
        if let Some(version) = self.version {
            write!(f, " version={version}")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for PushError {}
