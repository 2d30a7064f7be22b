use crate::params::ChainParams;

/// Block gas limit with the admissibility rule relative to the parent block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GasLimit(pub u64);

impl GasLimit {
    /// A gas limit may move at most `parent / divisor` per block and may never
    /// drop below the protocol minimum.
    pub fn is_valid(self, parent_gas_limit: u64, params: &ChainParams) -> bool {
        if self.0 < params.min_gas_limit {
            return false;
        }
        self.0.abs_diff(parent_gas_limit) <= parent_gas_limit / params.gas_limit_bound_divisor
    }

    /// Moves `parent` toward `target` by at most one bound step.
    pub fn toward(parent_gas_limit: u64, target: u64, params: &ChainParams) -> GasLimit {
        let step = parent_gas_limit / params.gas_limit_bound_divisor;
        let next = if target > parent_gas_limit {
            parent_gas_limit.saturating_add(step.min(target - parent_gas_limit))
        } else {
            parent_gas_limit - step.min(parent_gas_limit - target)
        };
        GasLimit(next.max(params.min_gas_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries() {
        let p = ChainParams::default();
        let parent = 10_000_000u64;
        let step = parent / p.gas_limit_bound_divisor;
        assert!(GasLimit(parent).is_valid(parent, &p));
        assert!(GasLimit(parent + step).is_valid(parent, &p));
        assert!(GasLimit(parent - step).is_valid(parent, &p));
        assert!(!GasLimit(parent + step + 1).is_valid(parent, &p));
        assert!(!GasLimit(parent - step - 1).is_valid(parent, &p));
        assert!(!GasLimit(p.min_gas_limit - 1).is_valid(p.min_gas_limit, &p));
    }

    #[test]
    fn test_toward_clamps() {
        let p = ChainParams::default();
        let parent = 10_240_000u64;
        assert_eq!(GasLimit::toward(parent, u64::MAX, &p), GasLimit(parent + 10_000));
        assert_eq!(GasLimit::toward(parent, parent + 5, &p), GasLimit(parent + 5));
        assert_eq!(GasLimit::toward(parent, 0, &p), GasLimit(parent - 10_000));
        assert_eq!(GasLimit::toward(p.min_gas_limit, 0, &p), GasLimit(p.min_gas_limit));
    }

    proptest! {
        #[test]
        fn prop_parent_always_valid_and_over_bound_never(parent in 1_000_000u64..(u64::MAX / 2)) {
            let p = ChainParams::default();
            prop_assert!(GasLimit(parent).is_valid(parent, &p));
            let over = parent + parent / p.gas_limit_bound_divisor + 1;
            prop_assert!(!GasLimit(over).is_valid(parent, &p));
        }

        #[test]
        fn prop_toward_is_admissible(parent in 1_000_000u64..(u64::MAX / 2), target in any::<u64>()) {
            let p = ChainParams::default();
            prop_assert!(GasLimit::toward(parent, target, &p).is_valid(parent, &p));
        }
    }
}
