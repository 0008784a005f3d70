//! Seam to the external symbolic-execution engine.
//!
//! The engine itself lives outside this crate: it consumes bytecode, a
//! description of the symbolic input buffer and an exploration bound, and
//! returns a tree of terminal outcomes. This module defines that contract
//! plus the ABI packing of the symbolic calldata buffer.

use alloy::primitives::Bytes;

use crate::abi::{Decl, Method};
use crate::symbolic::expr::Word;
use crate::symbolic::tree::ExecTree;

/// Fixed exploration depth: one loop iteration / call-depth unit, no
/// unrolling.
pub const EXPLORATION_BOUND: usize = 1;

/// Description of the symbolic input buffer handed to the engine: an
/// optional concrete 4-byte selector prefix followed by one symbolic word
/// per declared parameter, packed per the ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymBuf {
    pub selector: Option<[u8; 4]>,
    pub words: Vec<Decl>,
}

impl SymBuf {
    /// Runtime-call buffer for one ABI method: selector then parameter
    /// words.
    pub fn for_method(method: &Method) -> SymBuf {
        SymBuf { selector: Some(method.selector()), words: method.inputs.clone() }
    }

    /// Creation-code buffer: constructor parameter words only, no selector.
    pub fn for_constructor(inputs: &[Decl]) -> SymBuf {
        SymBuf { selector: None, words: inputs.to_vec() }
    }

    /// The symbolic word standing for each declared parameter, in ABI
    /// order.
    pub fn arg_words(&self) -> Vec<Word> {
        self.words.iter().map(|d| Word::var(&d.name)).collect()
    }
}

/// The external symbolic-execution engine contract.
///
/// Implementations must return a tree whose leaves are `Success`, `Failure`
/// or `Partial`; internal branch nodes are flattened by the summarizer
/// before any further processing.
pub trait SymbolicEngine: Send + Sync {
    fn explore(&self, code: &Bytes, input: &SymBuf, bound: usize) -> anyhow::Result<ExecTree>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiType;

    #[test]
    fn test_method_buffer_carries_selector_and_words() {
        let method = Method {
            name: "transfer".to_string(),
            inputs: vec![
                Decl::new(AbiType::Address, "to"),
                Decl::new(AbiType::UInt(256), "amount"),
            ],
            outputs: vec![AbiType::Bool],
        };
        let buf = SymBuf::for_method(&method);
        assert_eq!(buf.selector, Some([0xa9, 0x05, 0x9c, 0xbb]));
        assert_eq!(buf.arg_words(), vec![Word::var("to"), Word::var("amount")]);
    }
}
