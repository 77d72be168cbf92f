//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::Path;

use custody_core::{ContentHash, Identifier, Identity, PrivateKey, PublicKey, Role};
use custody_store::{MemoryStore, SqliteStore};

/// A participant: a private key and the identity it registers.
pub struct Party {
    pub key: PrivateKey,
    pub identity: Identity,
}

impl Party {
    /// Create a party with a random key.
    pub fn new(role: Role) -> Self {
        Self::from_key(PrivateKey::generate(), role)
    }

    /// Create a party with a deterministic key.
    pub fn with_seed(seed: [u8; 32], role: Role) -> Self {
        Self::from_key(PrivateKey::from_bytes(seed), role)
    }

    fn from_key(key: PrivateKey, role: Role) -> Self {
        let identity = Identity::new(key.public_key(), role);
        Self { key, identity }
    }

    /// The party's identifier.
    pub fn id(&self) -> Identifier {
        self.identity.identifier()
    }

    /// The party's public key.
    pub fn public_key(&self) -> &PublicKey {
        self.identity.public_key()
    }
}

/// Context for hashing a party index into a key seed.
const PARTY_SEED_CONTEXT: &str = "custody testkit party seed v1";

/// Create parties with distinct deterministic keys, cycling through roles.
///
/// Seeds are hashed from the index: X25519 clamping discards the low bits
/// of the first byte, so adjacent raw indices would collide.
pub fn multi_party(count: usize) -> Vec<Party> {
    const ROLES: [Role; 4] = [
        Role::Patient,
        Role::CareProvider,
        Role::Researcher,
        Role::Regulator,
    ];
    (0..count)
        .map(|i| {
            let seed = ContentHash::derive(PARTY_SEED_CONTEXT, &(i as u64).to_le_bytes()).0;
            Party::with_seed(seed, ROLES[i % ROLES.len()])
        })
        .collect()
}

/// An in-memory store with `parties` registered.
pub fn memory_store_with(parties: &[&Party]) -> MemoryStore {
    let store = MemoryStore::new();
    for party in parties {
        store
            .register(party.identity.clone())
            .expect("register in memory store");
    }
    store
}

/// A SQLite store at `path` with `parties` registered.
pub async fn sqlite_store_with(path: impl AsRef<Path>, parties: &[&Party]) -> SqliteStore {
    let store = SqliteStore::open(path).expect("open sqlite store");
    for party in parties {
        store
            .register(party.identity.clone())
            .await
            .expect("register in sqlite store");
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_store::IdentityRegistry;

    #[test]
    fn test_multi_party_distinct() {
        let parties = multi_party(12);

        let ids: Vec<_> = parties.iter().map(Party::id).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(parties[1].identity.role(), Role::CareProvider);
        assert_eq!(parties[4].identity.role(), Role::Patient);
        assert_eq!(multi_party(3)[2].id(), parties[2].id());
    }

    #[test]
    fn test_seeded_party_is_stable() {
        let a = Party::with_seed([7; 32], Role::Researcher);
        let b = Party::with_seed([7; 32], Role::Researcher);
        assert_eq!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_stores_resolve_parties() {
        let parties = multi_party(2);
        let refs: Vec<&Party> = parties.iter().collect();

        let memory = memory_store_with(&refs);
        assert_eq!(
            memory.resolve(&parties[0].id()).await.unwrap(),
            Some(parties[0].identity.clone())
        );

        let dir = tempfile::tempdir().unwrap();
        let sqlite = sqlite_store_with(dir.path().join("fixtures.db"), &refs).await;
        assert_eq!(
            sqlite.resolve(&parties[1].id()).await.unwrap(),
            Some(parties[1].identity.clone())
        );
    }
}
