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
pub mod common;
pub mod exec;
pub mod storage;

// StarRocks-BE-like folder layout, with `novarocks_push_*` convenience aliases.
pub use common::app_config as novarocks_push_config;
pub use common::logging as novarocks_push_logging;

pub use common::ids::{RowsetId, TabletId, Version};
pub use common::status::{PushError, PushErrorKind, PushResult, PushStage};
pub use exec::chunk::Chunk;
pub use storage::push::{PushHandler, PushRequest, PushTarget, PushType, TabletLoadResult};
pub use storage::schema::{LogicalType, TabletColumn, TabletSchema};
pub use storage::tablet::{Tablet, TabletManager, TabletVariant};
