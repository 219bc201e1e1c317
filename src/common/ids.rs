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
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tablet ids are assigned by FE and always positive.
pub type TabletId = i64;

/// Rowset version number. Versions start at 1; 0 and negatives are never valid
/// for a push.
pub type Version = i64;

static NEXT_ROWSET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a rowset produced by this backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RowsetId(pub u64);

impl RowsetId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Allocate the next id. Ids are never reused within the process.
    pub fn next() -> Self {
        Self(NEXT_ROWSET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RowsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for RowsetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = u64::from_str_radix(s.trim(), 16)
            .map_err(|e| format!("invalid rowset id string '{}': {}", s, e))?;
        Ok(Self(v))
    }
}
