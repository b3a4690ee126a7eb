// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout mcastd.

use std::convert;

pub type McastdResult<T> = Result<T, McastdError>;

#[derive(Debug, thiserror::Error)]
pub enum McastdError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    #[error("Vif table is full")]
    VifTableFull,
    #[error("Forwarding counter read failed: {0}")]
    CounterRead(String),
    #[error("Error: {0}")]
    Other(String),
}

impl convert::From<std::io::Error> for McastdError {
    fn from(err: std::io::Error) -> Self {
        McastdError::Io(err)
    }
}

impl convert::From<String> for McastdError {
    fn from(err: String) -> Self {
        McastdError::Other(err)
    }
}

impl convert::From<&str> for McastdError {
    fn from(err: &str) -> Self {
        McastdError::Other(err.to_string())
    }
}

impl convert::From<anyhow::Error> for McastdError {
    fn from(err: anyhow::Error) -> Self {
        McastdError::Other(err.to_string())
    }
}
