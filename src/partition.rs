//! Storage partitioning: decompose a symbolic final-storage expression into
//! a concrete slot -> value mapping.
//!
//! The write chain is traversed from the outermost (most recent) write
//! toward the base store; the first value seen per slot wins, since it
//! shadows every older write to the same slot. A write whose key is not a
//! literal makes the contract undecompilable: no aliasing reasoning is
//! attempted between symbolic and concrete slots.
//!
//! Known precision gap: the traversal does not diff against the pre-call
//! storage state, so a write restoring a slot to its original value is
//! still reported as an update.

use std::collections::BTreeMap;

use alloy::primitives::U256;

use crate::error::{DecompileError, Result};
use crate::symbolic::expr::{Store, Word};

/// At most one value per slot, derived only from writes with literal slot
/// indices.
pub type DistinctStoreMap = BTreeMap<U256, Word>;

pub fn partition(store: &Store) -> Result<DistinctStoreMap> {
    let mut out = DistinctStoreMap::new();
    let mut current = store;
    loop {
        match current {
            Store::Write { slot, value, prev } => {
                match slot {
                    Word::Lit(key) => {
                        // Top-down: first write wins.
                        out.entry(*key).or_insert_with(|| value.clone());
                    }
                    symbolic => {
                        return Err(DecompileError::unsupported(format!(
                            "write to symbolic storage key `{symbolic}`"
                        )));
                    }
                }
                current = prev;
            }
            // An unconstrained prior store or a fully concrete base store
            // ends the chain; concrete base contents are initial state, not
            // updates.
            Store::Abstract | Store::Concrete(_) => return Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::expr::Word;

    #[test]
    fn test_first_write_wins() {
        // Outermost write is the most recent: sstore(0, new, sstore(0, old, _)).
        let chain = Store::write(
            Word::lit(0),
            Word::var("new"),
            Store::write(Word::lit(0), Word::var("old"), Store::Abstract),
        );
        let map = partition(&chain).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&U256::ZERO), Some(&Word::var("new")));
    }

    #[test]
    fn test_distinct_slots_all_kept() {
        let chain = Store::write(
            Word::lit(1),
            Word::var("x"),
            Store::write(Word::lit(2), Word::var("y"), Store::Concrete(Default::default())),
        );
        let map = partition(&chain).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_symbolic_key_is_fatal() {
        let chain = Store::write(Word::var("k"), Word::var("v"), Store::Abstract);
        let err = partition(&chain).unwrap_err();
        assert!(matches!(err, DecompileError::UnsupportedConstruct(_)));
        assert!(err.to_string().contains("symbolic storage key"));
    }

    #[test]
    fn test_symbolic_key_below_literal_writes_is_still_fatal() {
        let chain = Store::write(
            Word::lit(0),
            Word::var("v"),
            Store::write(Word::var("k"), Word::var("w"), Store::Abstract),
        );
        assert!(partition(&chain).is_err());
    }
}
