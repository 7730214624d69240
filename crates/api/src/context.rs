use scenecraft_core::ClientKey;

/// Who is calling, as far as throttling is concerned.
///
/// Inserted by [`crate::middleware::client_middleware`] on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    key: ClientKey,
}

impl ClientContext {
    pub fn new(key: ClientKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &ClientKey {
        &self.key
    }
}
