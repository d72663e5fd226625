//! Record currency passed between handlers, pumps, and the sink.

/// An opaque value flowing through the stage.
///
/// The manager never inspects record contents; it only needs a size so the
/// input/output byte counters stay current. Records move by value between
/// stages and are never shared for concurrent mutation.
pub trait Record: Send + 'static {
    /// Size of the record in bytes.
    fn size_bytes(&self) -> u64;
}

impl Record for String {
    fn size_bytes(&self) -> u64 {
        self.len() as u64
    }
}

impl Record for Vec<u8> {
    fn size_bytes(&self) -> u64 {
        self.len() as u64
    }
}

impl Record for serde_json::Value {
    /// Length of the serialized form.
    fn size_bytes(&self) -> u64 {
        self.to_string().len() as u64
    }
}
