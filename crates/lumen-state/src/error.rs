use lumen_crypto::Bytes32;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage backend: {0}")]
    Backend(String),

    #[error("missing trie node {0}")]
    MissingTrieNode(Bytes32),

    #[error("missing code {0}")]
    MissingCode(Bytes32),

    #[error("invalid revision {0}")]
    InvalidRevision(usize),

    #[error("rlp decode: {0}")]
    Rlp(#[from] rlp::DecoderError),

    #[error("trie encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StateError {
    fn from(e: rocksdb::Error) -> Self {
        StateError::Backend(e.into_string())
    }
}
