//! Versioned account state for the Lumen chain.
//!
//! A [`State`] is a writable view over the account trie at some root. All
//! writes go to a [`Journal`] so they can be rolled back to a checkpoint;
//! [`State::stage`] folds the journal into trie updates and produces a
//! [`Stage`] that can be hashed without I/O and committed to a [`KvStore`].

pub mod account;
pub mod cache;
pub mod error;
pub mod journal;
pub mod kv;
pub mod stage;
pub mod state;
pub mod trie;

pub use account::Account;
pub use cache::TrieCache;
pub use error::StateError;
pub use journal::Journal;
pub use kv::{KvStore, MemKv, WriteBatch};
#[cfg(feature = "rocksdb")]
pub use kv::RocksKv;
pub use stage::Stage;
pub use state::{State, StateCreator};
pub use trie::{merkle_root_of, MerkleTrie, EMPTY_ROOT};

pub use primitive_types::U256;
