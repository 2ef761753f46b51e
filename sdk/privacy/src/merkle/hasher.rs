use std::sync::OnceLock;

use ark_bls12_381::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge},
};
use ark_ff::PrimeField;

use super::{ARITY, DEPTH};
use crate::commitment::{fr_to_bytes, poseidon_config};

/// Node hash in little-endian field encoding
pub type Hash = [u8; 32];

static HASHER: OnceLock<MerkleHasher> = OnceLock::new();

/// Poseidon-based Merkle hash function over `ARITY` children
pub struct MerkleHasher {
    config: PoseidonConfig<Fr>,
    /// Precomputed empty subtree roots, indexed by height (0 = leaf)
    empty_roots: Vec<Hash>,
}

impl MerkleHasher {
    pub fn new() -> Self {
        let config = poseidon_config(ARITY);
        let empty_leaf = Self::compute_empty_leaf(&config);
        let empty_roots = Self::compute_empty_roots(&config, empty_leaf);

        Self {
            config,
            empty_roots,
        }
    }

    /// Process-wide hasher. Building the Poseidon constants is slow, so every
    /// tree and every proof check shares this one.
    pub fn global() -> &'static MerkleHasher {
        HASHER.get_or_init(MerkleHasher::new)
    }

    /// Hash `ARITY` children to get their parent
    pub fn hash_children(&self, children: &[Hash; ARITY]) -> Hash {
        hash_with(&self.config, children)
    }

    /// Get the empty root at a given height
    pub fn empty_root(&self, height: usize) -> &Hash {
        &self.empty_roots[height]
    }

    fn compute_empty_leaf(config: &PoseidonConfig<Fr>) -> Hash {
        let mut sponge = PoseidonSponge::new(config);
        sponge.absorb(&Fr::from(0u64));
        let result: Fr = sponge.squeeze_field_elements(1)[0];
        fr_to_bytes(result)
    }

    fn compute_empty_roots(config: &PoseidonConfig<Fr>, empty_leaf: Hash) -> Vec<Hash> {
        let mut roots = Vec::with_capacity(DEPTH + 1);
        roots.push(empty_leaf);

        let mut prev = empty_leaf;
        for _ in 0..DEPTH {
            prev = hash_with(config, &[prev; ARITY]);
            roots.push(prev);
        }

        roots
    }
}

impl Default for MerkleHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_with(config: &PoseidonConfig<Fr>, children: &[Hash; ARITY]) -> Hash {
    let mut sponge = PoseidonSponge::new(config);
    for child in children {
        sponge.absorb(&Fr::from_le_bytes_mod_order(child));
    }
    let result: Fr = sponge.squeeze_field_elements(1)[0];
    fr_to_bytes(result)
}
