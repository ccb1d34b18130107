// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Error;

/// Hex encoded SHA-256 of the canonical JSON form of `spec`.
///
/// The spec goes through `serde_json::Value` first, whose object keys are
/// ordered, so the digest does not depend on field order or formatting.
pub fn fingerprint<T: Serialize>(spec: &T) -> Result<String, Error> {
    let canonical = serde_json::to_value(spec)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|e| Error::HashComputeFailed(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}
