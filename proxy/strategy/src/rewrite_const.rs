// Copyright 2022 SphereEx Authors
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


pub const ORDER_BY_DERIVED: &str = "ORDER_BY_DERIVED";
pub const GROUP_BY_DERIVED: &str = "GROUP_BY_DERIVED";
pub const AVG_DERIVED_COUNT: &str = "AVG_DERIVED_COUNT";
pub const AVG_DERIVED_SUM: &str = "AVG_DERIVED_SUM";
pub const COUNT: &str = "COUNT";
pub const SUM: &str = "SUM";
pub const AVG: &str = "AVG";
pub const MIN: &str = "MIN";
pub const MAX: &str = "MAX";
pub const AS: &str = "AS";
pub const ORDER_BY: &str = "ORDER BY";
pub const ASC: &str = "ASC";
pub const DESC: &str = "DESC";
