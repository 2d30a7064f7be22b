//! Built-in native contracts.
//!
//! Both contracts keep their data in ordinary contract storage, so every
//! change made through them is journaled and reverts with the state.

pub mod authority;
pub mod params;

use lumen_core::params::SLOAD_GAS;
use lumen_crypto::{blake2b256, Bytes32};

use crate::error::{NativeError, VmError};
use crate::native::{NativeEnv, NativeRegistry};

pub use authority::{Authority, Candidate};
pub use params::Params;

pub(crate) fn register(registry: &mut NativeRegistry) {
    authority::register(registry);
    params::register(registry);
}

pub(crate) fn event_topic(signature: &str) -> Bytes32 {
    blake2b256(signature.as_bytes())
}

/// Charges one storage read and fails unless the transaction origin is the
/// executor recorded in `Params`.
pub(crate) fn require_executor(env: &mut NativeEnv<'_>) -> Result<(), NativeError> {
    env.use_gas(SLOAD_GAS)?;
    let executor = Params::new(env.state()).executor()?;
    if env.caller() != executor {
        return Err(VmError::Unauthorized(env.caller()).into());
    }
    Ok(())
}
