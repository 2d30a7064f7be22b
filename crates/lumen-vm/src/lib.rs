//! Lumen transaction runtime.
//!
//! Executes transactions clause by clause against a [`lumen_state::State`].
//! There is no bytecode interpreter: clauses either move value, create a
//! contract account, or call a native contract from the
//! [`NativeRegistry`]. Clause execution can be interrupted through a
//! cancellation token.

pub mod builtin;
pub mod context;
pub mod error;
pub mod native;
pub mod resolved;
pub mod runtime;

pub use builtin::{Authority, Candidate, Params};
pub use context::{BlockContext, TxContext};
pub use error::{NativeError, RuntimeError, VmError};
pub use native::{call_data, selector, NativeEnv, NativeFn, NativeMethod, NativeRegistry};
pub use resolved::ResolvedTransaction;
pub use runtime::{contract_address, ClauseInterrupter, Output, PreparedClause, Runtime, TransactionExecutor};
