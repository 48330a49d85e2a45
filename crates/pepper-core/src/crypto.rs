//! Cryptographic primitives (C1): X25519 key pairs, shared secrets, and PETs.
//!
//! PEPPER reuses one X25519 key pair for every peer encountered within an
//! epoch, so the secret half is a [`StaticSecret`] rather than the
//! single-use `EphemeralSecret` — unlike a one-shot handshake, the same
//! secret is diffie-hellman'd against many different peer public keys
//! before it is discarded at the next epoch boundary.

use crate::error::{Error, Result};
use crate::types::{Bytes32, Pet, PetPair};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use x25519_dalek::{PublicKey, StaticSecret};

/// The PET prefix byte used for the lexicographically larger side's ET.
const PREFIX_ONE: u8 = 0x01;
/// The PET prefix byte used for the lexicographically larger side's RT.
const PREFIX_TWO: u8 = 0x02;

/// A per-epoch X25519 key pair. The secret half is never serialised or
/// logged; only [`Keys::public_bytes`] ever leaves this type.
pub struct Keys {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keys {
    /// Generate a fresh key pair for a new epoch.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Construct from fixed bytes, for deterministic tests.
    pub fn from_secret_bytes(bytes: Bytes32) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key; this also serves as the local EBID seed (§3).
    pub fn public_bytes(&self) -> Bytes32 {
        *self.public.as_bytes()
    }

    /// X25519 shared secret with a peer's public key (or EBID, which is the
    /// peer's public key by construction).
    pub fn shared_secret(&self, peer_public: &Bytes32) -> Bytes32 {
        let peer = PublicKey::from(*peer_public);
        *self.secret.diffie_hellman(&peer).as_bytes()
    }
}

/// `SHA256(prefix_byte || shared_secret(sk, peer_pk))`.
pub fn gen_pet(keys: &Keys, peer_public: &Bytes32, prefix: u8) -> Pet {
    let shared = keys.shared_secret(peer_public);
    let mut hasher = Sha256::new();
    hasher.update([prefix]);
    hasher.update(shared);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Pet(out)
}

/// Derive the mirrored `(ET, RT)` pair for an encounter with `peer_ebid`.
///
/// The prefix assignment depends on a byte-wise lexicographic comparison of
/// `keys.public_bytes()` against `peer_ebid`: the larger of the two uses
/// prefix `0x01` for its ET (and `0x02` for its RT); the smaller uses the
/// opposite assignment. This mirrors the reference implementation's
/// `crypto_manager_gen_pets`, and guarantees `A.et == B.rt` for any two
/// devices deriving PETs for the same encounter, regardless of which side
/// computes first.
pub fn gen_pet_pair(keys: &Keys, peer_ebid: &Bytes32) -> Result<PetPair> {
    let pk = keys.public_bytes();
    match pk.cmp(peer_ebid) {
        Ordering::Equal => Err(Error::IdenticalPeer),
        Ordering::Greater => Ok(PetPair {
            et: gen_pet(keys, peer_ebid, PREFIX_ONE),
            rt: gen_pet(keys, peer_ebid, PREFIX_TWO),
        }),
        Ordering::Less => Ok(PetPair {
            et: gen_pet(keys, peer_ebid, PREFIX_TWO),
            rt: gen_pet(keys, peer_ebid, PREFIX_ONE),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_is_symmetric() {
        let alice = Keys::generate();
        let bob = Keys::generate();

        let a_shared = alice.shared_secret(&bob.public_bytes());
        let b_shared = bob.shared_secret(&alice.public_bytes());
        assert_eq!(a_shared, b_shared);
    }

    #[test]
    fn pet_pair_mirrors_across_devices() {
        let alice = Keys::generate();
        let bob = Keys::generate();

        let alice_pair = gen_pet_pair(&alice, &bob.public_bytes()).unwrap();
        let bob_pair = gen_pet_pair(&bob, &alice.public_bytes()).unwrap();

        assert_eq!(alice_pair.et, bob_pair.rt);
        assert_eq!(alice_pair.rt, bob_pair.et);
    }

    #[test]
    fn identical_peer_is_rejected() {
        let alice = Keys::generate();
        let self_ebid = alice.public_bytes();
        assert!(matches!(
            gen_pet_pair(&alice, &self_ebid),
            Err(Error::IdenticalPeer)
        ));
    }

    #[test]
    fn pet_derivation_is_deterministic() {
        let alice = Keys::from_secret_bytes([0x11; 32]);
        let peer_ebid = [0x22; 32];

        let pair1 = gen_pet_pair(&alice, &peer_ebid).unwrap();
        let pair2 = gen_pet_pair(&alice, &peer_ebid).unwrap();
        assert_eq!(pair1, pair2);
    }
}
