//! Authenticated user identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an authenticated user.
///
/// Only code that has authenticated the caller constructs one; the per-user
/// key prefix is derived from it and from nothing else.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
