//! ABI and storage-layout descriptions of the compiled artifact under
//! analysis, plus selector derivation and dispatch-table scanning.

use std::collections::BTreeSet;
use std::fmt;

use alloy::primitives::{keccak256, Bytes, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AbiType {
    UInt(usize),
    Int(usize),
    Address,
    Bool,
    FixedBytes(usize),
    DynBytes,
    String,
    Array(Box<AbiType>),
    Tuple(Vec<AbiType>),
    Function,
}

impl AbiType {
    /// Whether a value of this type occupies exactly one statically-sized
    /// calldata word. Tuples, function pointers and dynamically-sized types
    /// do not qualify.
    pub fn is_static_word(&self) -> bool {
        matches!(
            self,
            AbiType::UInt(_)
                | AbiType::Int(_)
                | AbiType::Address
                | AbiType::Bool
                | AbiType::FixedBytes(_)
        )
    }

    /// Inclusive upper bound of the type's unsigned value range, as a
    /// 256-bit word. `None` for types without a single-word range.
    pub fn upper_bound(&self) -> Option<U256> {
        match self {
            AbiType::UInt(256) => Some(U256::MAX),
            AbiType::UInt(n) if *n < 256 => Some((U256::from(1) << *n) - U256::from(1)),
            AbiType::Int(n) if *n <= 256 => Some((U256::from(1) << (*n - 1)) - U256::from(1)),
            AbiType::Address => Some((U256::from(1) << 160) - U256::from(1)),
            AbiType::Bool => Some(U256::from(1)),
            AbiType::FixedBytes(32) => Some(U256::MAX),
            AbiType::FixedBytes(n) if *n < 32 => {
                Some((U256::from(1) << (8 * n)) - U256::from(1))
            }
            _ => None,
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            AbiType::UInt(n) => format!("uint{n}"),
            AbiType::Int(n) => format!("int{n}"),
            AbiType::Address => "address".to_string(),
            AbiType::Bool => "bool".to_string(),
            AbiType::FixedBytes(n) => format!("bytes{n}"),
            AbiType::DynBytes => "bytes".to_string(),
            AbiType::String => "string".to_string(),
            AbiType::Array(inner) => format!("{}[]", inner.canonical()),
            AbiType::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(AbiType::canonical).collect();
                format!("({})", inner.join(","))
            }
            AbiType::Function => "function".to_string(),
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A named, typed parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Decl {
    pub ty: AbiType,
    pub name: String,
}

impl Decl {
    pub fn new(ty: AbiType, name: impl Into<String>) -> Self {
        Decl { ty, name: name.into() }
    }
}

/// A callable interface: name plus ordered typed parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub decls: Vec<Decl>,
}

impl Interface {
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.decls.iter().map(|d| d.ty.canonical()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// Dispatch selector: the first four bytes of the keccak-256 hash of the
    /// canonical signature.
    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

/// One ABI method of the runtime code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub inputs: Vec<Decl>,
    pub outputs: Vec<AbiType>,
}

impl Method {
    pub fn interface(&self) -> Interface {
        Interface { name: self.name.clone(), decls: self.inputs.clone() }
    }

    pub fn selector(&self) -> [u8; 4] {
        self.interface().selector()
    }
}

/// Declared type of one storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotType {
    Scalar(AbiType),
    Mapping { key: AbiType, value: AbiType },
    Contract(String),
}

impl SlotType {
    pub fn is_scalar(&self) -> bool {
        matches!(self, SlotType::Scalar(_))
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotType::Scalar(ty) => write!(f, "{ty}"),
            SlotType::Mapping { key, value } => write!(f, "mapping({key} => {value})"),
            SlotType::Contract(name) => write!(f, "contract {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub label: String,
    pub slot: U256,
    pub offset: u32,
    pub ty: SlotType,
}

/// Compiler-produced storage layout: ordered records of variable name, slot
/// index, byte offset and declared type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub entries: Vec<StorageEntry>,
}

impl StorageLayout {
    pub fn by_label(&self, label: &str) -> Option<&StorageEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    /// Inverted layout lookup: slot index back to the declared item.
    pub fn by_slot(&self, slot: U256) -> Option<&StorageEntry> {
        self.entries.iter().find(|e| e.slot == slot)
    }
}

/// The compiled artifact consumed by the pipeline.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub creation: Bytes,
    pub runtime: Bytes,
    pub constructor_inputs: Vec<Decl>,
    pub methods: Vec<Method>,
    pub layout: Option<StorageLayout>,
}

/// Extract every 4-byte selector pushed by the runtime code's dispatch
/// prologue. Walks the bytecode skipping PUSH immediates so push data is not
/// misread as opcodes.
pub fn dispatch_selectors(runtime: &[u8]) -> BTreeSet<[u8; 4]> {
    let mut out = BTreeSet::new();
    let mut i = 0usize;
    while i < runtime.len() {
        let op = runtime[i];
        match op {
            // PUSH4
            0x63 if i + 4 < runtime.len() => {
                let mut sel = [0u8; 4];
                sel.copy_from_slice(&runtime[i + 1..i + 5]);
                out.insert(sel);
                i += 5;
            }
            // PUSH1..PUSH32
            0x60..=0x7f => i += 2 + (op - 0x60) as usize,
            _ => i += 1,
        }
    }
    out
}
