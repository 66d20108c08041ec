// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors encountered while trying to export/import device state.
#[derive(Debug, Error)]
pub enum MigrateStateError {
    /// The device failed to import the deserialized device state.
    #[error("failed to apply deserialized device state: {0}")]
    ImportFailed(String),

    /// The kind and/or version of payload was not expected
    #[error("kind/version of payload not expected: {0} v{1}")]
    UnexpectedPayload(String, u32),
}

/// Kind and version identifying a particular device state payload format.
pub type SchemaId = (&'static str, u32);

/// A serializable device state payload of a fixed kind and version.
pub trait Schema<'de>: Serialize + Deserialize<'de> + Sized {
    fn id() -> SchemaId;
}

/// Device state tagged with the kind/version of its payload.
#[derive(Debug, Deserialize, Serialize)]
pub struct Payload<T> {
    pub kind: String,
    pub version: u32,
    pub data: T,
}

impl<T: for<'de> Schema<'de>> Payload<T> {
    pub fn new(data: T) -> Self {
        let (kind, version) = T::id();
        Self { kind: kind.to_string(), version, data }
    }

    /// Unwrap the contained state, checking that it matches the expected
    /// schema.
    pub fn take(self) -> Result<T, MigrateStateError> {
        let (kind, version) = T::id();
        if self.kind != kind || self.version != version {
            return Err(MigrateStateError::UnexpectedPayload(
                self.kind,
                self.version,
            ));
        }
        Ok(self.data)
    }
}
