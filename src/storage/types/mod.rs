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
pub mod bitmap;
pub mod hll;

pub use bitmap::BitmapValue;
pub use hll::HyperLogLog;

/// Column types whose values travel as opaque serialized blobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ObjectType {
    Bitmap,
    Hll,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bitmap => "BITMAP",
            Self::Hll => "HLL",
        }
    }

    /// Rebuild the native value from its wire bytes and return the bytes
    /// stored in the segment column.
    pub fn wire_to_storage(self, wire: &[u8]) -> Result<Vec<u8>, String> {
        match self {
            Self::Bitmap => BitmapValue::deserialize(wire)?.to_storage_bytes(),
            Self::Hll => Ok(HyperLogLog::deserialize(wire)?.serialize()),
        }
    }
}
