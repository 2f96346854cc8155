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


use std::{error::Error as StdError, io::Error as IoError};

use strategy::{
    config::ConfigError, merge::MergeError, rewrite::RewriteError, route::RouteError,
};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ErrorKind {
    #[error("runtime error: {0:?}")]
    Runtime(#[from] Box<dyn StdError + Send + Sync>),

    #[error("stdio error: {0:?}")]
    Io(#[from] IoError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("route error: {0}")]
    Route(#[from] RouteError),

    #[error("rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
}

#[derive(Debug, ThisError)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

macro_rules! impl_from_stage_error {
    ($($typ:ty),*) => {
        $(
            impl From<$typ> for Error {
                fn from(e: $typ) -> Self {
                    Error::new(ErrorKind::from(e))
                }
            }
        )*
    };
}

impl_from_stage_error!(IoError, ConfigError, RouteError, RewriteError, MergeError);

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_stage_errors() {
        let err: Error = MergeError::NoCurrentRow.into();
        assert!(matches!(err.kind(), ErrorKind::Merge(MergeError::NoCurrentRow)));
        assert_eq!(err.to_string(), "merge error: no current row, call next first");

        let err: Error = RewriteError::ParameterIndexOutOfRange(3, 2).into();
        assert!(matches!(err.kind(), ErrorKind::Rewrite(_)));
    }
}
