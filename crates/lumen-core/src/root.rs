use lumen_crypto::Bytes32;
use lumen_state::merkle_root_of;
use rlp::Encodable;

/// Merkle root of an ordered list, keyed by the RLP of each item's index.
pub fn derive_root<T: Encodable>(items: &[T]) -> Bytes32 {
    merkle_root_of(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| (rlp::encode(&(i as u64)), rlp::encode(item))),
    )
}
