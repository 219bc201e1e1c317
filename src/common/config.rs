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
use parquet::basic::{Compression, ZstdLevel};

use crate::novarocks_push_config::config as push_app_config;

pub(crate) fn push_source_batch_size() -> usize {
    push_app_config()
        .ok()
        .map(|c| c.push.source_batch_size)
        .filter(|v| *v > 0)
        .unwrap_or(4096)
}

pub(crate) fn push_max_rowset_rows() -> Option<usize> {
    push_app_config()
        .ok()
        .map(|c| c.push.max_rowset_rows)
        .filter(|v| *v > 0)
}

pub(crate) fn push_segment_compression() -> Compression {
    let codec = push_app_config()
        .ok()
        .map(|c| c.push.segment_compression.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "snappy".to_string());
    match codec.as_str() {
        "none" => Compression::UNCOMPRESSED,
        "zstd" => Compression::ZSTD(ZstdLevel::default()),
        _ => Compression::SNAPPY,
    }
}
