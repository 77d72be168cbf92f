//! Proptest generators for property-based testing.

use proptest::prelude::*;

use custody_core::{
    ContentId, Identifier, Identity, PrivateKey, PublicKey, RecordMetadata, RecordRef, Role,
    WrappedKey,
};
use custody_perms::AuxMeta;

/// Generate a private key.
pub fn private_key() -> impl Strategy<Value = PrivateKey> {
    any::<[u8; 32]>().prop_map(PrivateKey::from_bytes)
}

/// Generate a public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    private_key().prop_map(|k| k.public_key())
}

/// Generate a random Identifier.
pub fn identifier() -> impl Strategy<Value = Identifier> {
    any::<[u8; 32]>().prop_map(Identifier::from_bytes)
}

/// Generate a random RecordRef.
pub fn record_ref() -> impl Strategy<Value = RecordRef> {
    any::<[u8; 32]>().prop_map(RecordRef::from_bytes)
}

/// Generate a Role.
pub fn role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Patient),
        Just(Role::CareProvider),
        Just(Role::Researcher),
        Just(Role::Regulator),
    ]
}

/// Generate an identity with a valid derived identifier.
pub fn identity() -> impl Strategy<Value = Identity> {
    (public_key(), role()).prop_map(|(pk, role)| Identity::new(pk, role))
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a record data type.
pub fn data_type() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,31}".prop_map(String::from)
}

/// Generate blob meta in the shape uploads produce.
pub fn aux_meta() -> impl Strategy<Value = AuxMeta> {
    prop::collection::btree_map("[a-zA-Z][a-zA-Z0-9]{0,15}", "[ -~]{0,64}", 0..6)
}

/// Generate record metadata. The wrapped bytes are arbitrary, not a real key.
pub fn record_metadata() -> impl Strategy<Value = RecordMetadata> {
    (
        identifier(),
        identifier(),
        data_type(),
        "[0-9a-f]{64}",
        prop::collection::vec(any::<u8>(), 1..128),
    )
        .prop_filter_map("valid metadata", |(owner, reader, data_type, cid, wrapped)| {
            RecordMetadata::new(
                owner,
                data_type,
                ContentId::new(cid),
                WrappedKey::new(reader, wrapped),
            )
            .ok()
        })
}
