// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Group and object identifiers.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Group identifier backed by slotmap's generational keys.
    ///
    /// A discarded group's id is never reused with the same version, so a
    /// stale id held by a cell cannot alias a newer group.
    pub struct GroupId;
}

/// Externally issued object identifier. Opaque to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);
