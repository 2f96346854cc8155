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


/// Generates, per optional dependency, an accessor, a `require_` accessor
/// that fails with `RewriteError::MissingCapability`, and a `with_` setter.
macro_rules! gen_dep_accessors {
    ($deps:ident, $($name:ident: $typ:ty),*) => {
        paste! {
            impl<'a> $deps<'a> {
                $(
                    pub fn $name(&self) -> Option<$typ> {
                        self.$name
                    }

                    pub fn [<require_ $name>](&self) -> Result<$typ, RewriteError> {
                        self.$name.ok_or(RewriteError::MissingCapability(stringify!($name)))
                    }

                    pub fn [<with_ $name>](mut self, value: $typ) -> Self {
                        self.$name = Some(value);
                        self
                    }
                )*
            }
        }
    };
}
