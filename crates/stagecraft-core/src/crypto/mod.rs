//! Blake3 hashing primitives shared by the predictor and the deployer.

mod hash;

pub use hash::{ContentHasher, Digest, HASH_SIZE, Hash, HexError, hex_decode, hex_encode};
