//! Shared fixtures for the integration suites: a scripted symbolic engine
//! and compiled-contract builders.

// Not every suite uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;

use alloy::primitives::Bytes;
use retrospec::abi::{AbiType, CompiledContract, Decl, Method, SlotType, StorageEntry, StorageLayout};
use retrospec::symbolic::engine::{SymBuf, SymbolicEngine};
use retrospec::symbolic::tree::ExecTree;
use alloy::primitives::U256;

/// An engine whose exploration results are scripted per (code, selector)
/// pair. Unscripted lookups are engine errors, mirroring a real engine that
/// cannot decode the input.
pub struct ScriptedEngine {
    trees: HashMap<(Bytes, Option<[u8; 4]>), ExecTree>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        ScriptedEngine { trees: HashMap::new() }
    }

    pub fn script(mut self, code: &Bytes, selector: Option<[u8; 4]>, tree: ExecTree) -> Self {
        self.trees.insert((code.clone(), selector), tree);
        self
    }
}

impl SymbolicEngine for ScriptedEngine {
    fn explore(&self, code: &Bytes, input: &SymBuf, _bound: usize) -> anyhow::Result<ExecTree> {
        self.trees
            .get(&(code.clone(), input.selector))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted exploration for this code and selector"))
    }
}

pub fn uint_method(name: &str, inputs: &[&str], outputs: &[AbiType]) -> Method {
    Method {
        name: name.to_string(),
        inputs: inputs
            .iter()
            .map(|n| Decl::new(AbiType::UInt(256), *n))
            .collect(),
        outputs: outputs.to_vec(),
    }
}

pub fn scalar_layout(entries: &[(&str, u64)]) -> StorageLayout {
    StorageLayout {
        entries: entries
            .iter()
            .map(|(label, slot)| StorageEntry {
                label: label.to_string(),
                slot: U256::from(*slot),
                offset: 0,
                ty: SlotType::Scalar(AbiType::UInt(256)),
            })
            .collect(),
    }
}

/// Runtime bytecode whose dispatch prologue pushes each method's selector.
pub fn dispatch_stub(methods: &[Method]) -> Bytes {
    let mut code = Vec::new();
    for method in methods {
        code.push(0x63);
        code.extend_from_slice(&method.selector());
    }
    code.push(0x00);
    Bytes::from(code)
}

pub fn contract(
    name: &str,
    creation: Bytes,
    runtime: Bytes,
    methods: Vec<Method>,
    layout: Option<StorageLayout>,
) -> CompiledContract {
    CompiledContract {
        name: name.to_string(),
        creation,
        runtime,
        constructor_inputs: vec![],
        methods,
        layout,
    }
}
