//! Note Commitments
//!
//! Implements Poseidon-based commitments for notes.
//!
//! ```text
//! Commitment = Poseidon(owner.h1 || owner.h2 || nonce || asset || value)
//! ```
//!
//! A commitment is what lands in the accumulator as a leaf. Entries the
//! client cannot decrypt only ever reach it in this form.

use std::sync::OnceLock;

use ark_bls12_381::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Serialize};

use crate::note::{Asset, Note};

/// A note commitment (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    /// Create commitment from field element
    pub fn from_field(f: Fr) -> Self {
        Self(fr_to_bytes(f))
    }

    /// Convert to field element
    pub fn to_field(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

static SCHEME: OnceLock<CommitmentScheme> = OnceLock::new();

/// Commitment scheme using Poseidon hash
pub struct CommitmentScheme {
    config: PoseidonConfig<Fr>,
}

impl CommitmentScheme {
    /// Create a new commitment scheme with Shroud Poseidon parameters
    pub fn new() -> Self {
        Self {
            config: poseidon_config(2),
        }
    }

    /// Process-wide scheme instance. Round constants are derived once.
    pub fn global() -> &'static CommitmentScheme {
        SCHEME.get_or_init(CommitmentScheme::new)
    }

    /// Commit to a note: C = Poseidon(h1, h2, nonce, kind, contract, id_lo, id_hi, value)
    pub fn commit(&self, note: &Note) -> Commitment {
        let mut sponge = PoseidonSponge::new(&self.config);

        sponge.absorb(&Fr::from_le_bytes_mod_order(&note.owner.h1));
        sponge.absorb(&Fr::from_le_bytes_mod_order(&note.owner.h2));
        sponge.absorb(&Fr::from_le_bytes_mod_order(&note.nonce));
        for f in asset_fields(&note.asset) {
            sponge.absorb(&f);
        }
        sponge.absorb(&Fr::from(note.value.as_u64()));

        let result: Fr = sponge.squeeze_field_elements(1)[0];
        Commitment::from_field(result)
    }
}

impl Default for CommitmentScheme {
    fn default() -> Self {
        Self::new()
    }
}

/// The asset id is split in two 128-bit limbs so ids above the field modulus
/// still map injectively.
fn asset_fields(asset: &Asset) -> [Fr; 4] {
    [
        Fr::from(asset.kind as u64),
        Fr::from_le_bytes_mod_order(&asset.contract),
        Fr::from_le_bytes_mod_order(&asset.id[..16]),
        Fr::from_le_bytes_mod_order(&asset.id[16..]),
    ]
}

pub(crate) fn fr_to_bytes(f: Fr) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

/// Poseidon configuration for Shroud
///
/// Field: BLS12-381 Fr (255 bits)
/// Capacity: 1, rate chosen by the caller
/// Security: 128 bits
pub(crate) fn poseidon_config(rate: usize) -> PoseidonConfig<Fr> {
    let prime_bits: u64 = 255;
    let capacity: usize = 1;
    let full_rounds: u64 = 8;
    let partial_rounds: u64 = if rate > 2 { 60 } else { 57 };
    let alpha: u64 = 5;
    let skip_matrices: u64 = 0;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        rate,
        full_rounds,
        partial_rounds,
        skip_matrices,
    );

    PoseidonConfig::new(
        full_rounds as usize,
        partial_rounds as usize,
        alpha,
        mds,
        ark,
        rate,
        capacity,
    )
}
