use std::collections::HashSet;

use async_trait::async_trait;

/// Decides which public keys belong to authorized members.
///
/// A completed handshake proves only that the peer controls the private key
/// matching its certificate. Whether that key is an admitted member is this
/// collaborator's call, made out-of-band — a membership ledger, a deployment
/// roster, an allowlist. Keys are identified by their DER encoding as carried
/// in the certificate.
#[async_trait]
pub trait MembershipRegistry: Send + Sync {
    async fn is_authorized(&self, key_der: &[u8]) -> bool;
}

/// Registry that admits every key.
///
/// For tests and closed deployments where admission is enforced elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenRegistry;

#[async_trait]
impl MembershipRegistry for OpenRegistry {
    async fn is_authorized(&self, _key_der: &[u8]) -> bool {
        true
    }
}

/// Fixed allowlist of DER-encoded public keys.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    members: HashSet<Vec<u8>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to the allowlist.
    pub fn admit(&mut self, key_der: impl Into<Vec<u8>>) {
        self.members.insert(key_der.into());
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl MembershipRegistry for StaticRegistry {
    async fn is_authorized(&self, key_der: &[u8]) -> bool {
        self.members.contains(key_der)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_registry_admits_anything() {
        assert!(OpenRegistry.is_authorized(b"whatever").await);
    }

    #[tokio::test]
    async fn static_registry_admits_only_members() {
        let mut registry = StaticRegistry::new();
        registry.admit(&b"member-key"[..]);

        assert!(registry.is_authorized(b"member-key").await);
        assert!(!registry.is_authorized(b"stranger-key").await);
        assert_eq!(registry.len(), 1);
    }
}
