// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a link's attach was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachError {
    Unauthorized,
    /// The link declared no capability at all.
    NoCapability,
    /// A responder with this name is already attached.
    NameTaken,
    /// The declared name is empty or contains a path separator.
    BadName,
}

impl AttachError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::NoCapability | Self::BadName => 400,
            Self::NameTaken => 409,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NoCapability => "NO_CAPABILITY",
            Self::NameTaken => "NAME_TAKEN",
            Self::BadName => "BAD_NAME",
        }
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
