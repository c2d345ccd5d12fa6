//! Messages delivered to task runners by the dataflow.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Header of an input message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataHeader {
    /// Producing system, e.g. the detector code
    pub origin: String,
    /// Data description, e.g. RAWDATA
    pub description: String,
    /// Link or sub-detector discriminator
    #[serde(default)]
    pub sub_specification: u32,
}

/// One (header, payload) reference of an input record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRef {
    /// Routing information
    pub header: DataHeader,
    /// Opaque message body
    pub payload: Vec<u8>,
}

impl DataRef {
    pub const fn new(header: DataHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Build a JSON-encoded data reference.
    pub fn encode<T: Serialize>(header: DataHeader, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            header,
            payload: serde_json::to_vec(value)?,
        })
    }

    /// Decode a JSON-encoded payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Data references of one message, keyed by the binding names the task declared
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRecord {
    inputs: Vec<(String, DataRef)>,
}

impl InputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, binding: impl Into<String>, data: DataRef) -> Self {
        self.insert(binding, data);
        self
    }

    pub fn insert(&mut self, binding: impl Into<String>, data: DataRef) {
        self.inputs.push((binding.into(), data));
    }

    /// Data bound under `binding`, if the message carries it.
    pub fn get(&self, binding: &str) -> Option<&DataRef> {
        self.inputs
            .iter()
            .find(|(name, _)| name == binding)
            .map(|(_, data)| data)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataRef)> {
        self.inputs.iter().map(|(name, data)| (name.as_str(), data))
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// What a task runner can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInput {
    /// A data message for `monitor_data`.
    Data(InputRecord),
    /// External end-of-cycle signal.
    Timer,
    /// No more data will arrive for this activity.
    EndOfStream,
}
