//! The specification AST: a contract-level behavioural specification over
//! unbounded integers and booleans.
//!
//! Expressions of both sorts share one enum carrying an explicit sort tag
//! (see [`Exp::sort`]); consumers check the tag before coercing subterms.
//! Equality on expressions ignores source-position metadata, so generated
//! nodes compare equal to parsed ones regardless of provenance.

use std::collections::BTreeMap;
use std::fmt;

use alloy::primitives::aliases::I512;
use alloy::primitives::{U256, U512};
use serde::{Deserialize, Serialize};

use crate::abi::{AbiType, Interface, SlotType};

/// 2^256 as an unbounded integer.
pub fn word_modulus() -> I512 {
    I512::from_raw(U512::from(1u64) << 256)
}

pub fn int_of_word(w: U256) -> I512 {
    I512::from_raw(U512::from_be_slice(&w.to_be_bytes::<32>()))
}

/// The word value of an unbounded literal, if it fits in 256 bits.
pub fn word_of_int(i: I512) -> Option<U256> {
    if i < I512::ZERO || i >= word_modulus() {
        return None;
    }
    let bytes = i.into_raw().to_be_bytes::<64>();
    Some(U256::from_be_slice(&bytes[32..]))
}

/// Timing of a storage reference: pre-state, post-state, or not yet pinned.
/// `Unspecified` occurrences are rewritten wholesale by [`Exp::at`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum When {
    #[default]
    Unspecified,
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sort {
    Integer,
    Boolean,
}

/// Source position. Compares equal to every other position, which gives the
/// whole AST its "equal modulo position info" semantics for free; hashing
/// is likewise position-blind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn none() -> Pos {
        Pos::default()
    }
}

impl PartialEq for Pos {
    fn eq(&self, _other: &Pos) -> bool {
        true
    }
}

impl Eq for Pos {}

impl std::hash::Hash for Pos {
    fn hash<H: std::hash::Hasher>(&self, _state: &mut H) {}
}

/// A named storage item reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageRef {
    pub contract: String,
    pub name: String,
    pub when: When,
}

/// Specification expression over unbounded integers and booleans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Exp {
    // Integer sort
    LitInt(Pos, I512),
    Var(Pos, AbiType, String),
    Read(Pos, StorageRef),
    Add(Pos, Box<Exp>, Box<Exp>),
    Sub(Pos, Box<Exp>, Box<Exp>),
    Mul(Pos, Box<Exp>, Box<Exp>),
    Div(Pos, Box<Exp>, Box<Exp>),
    Mod(Pos, Box<Exp>, Box<Exp>),
    Pow(Pos, Box<Exp>, Box<Exp>),
    Ite(Pos, Box<Exp>, Box<Exp>, Box<Exp>),
    // Boolean sort
    LitBool(Pos, bool),
    And(Pos, Box<Exp>, Box<Exp>),
    Or(Pos, Box<Exp>, Box<Exp>),
    Not(Pos, Box<Exp>),
    Eq(Pos, Box<Exp>, Box<Exp>),
    Neq(Pos, Box<Exp>, Box<Exp>),
    Lt(Pos, Box<Exp>, Box<Exp>),
    Leq(Pos, Box<Exp>, Box<Exp>),
    Gt(Pos, Box<Exp>, Box<Exp>),
    Geq(Pos, Box<Exp>, Box<Exp>),
    /// The value lies within the representable range of the given ABI type.
    InRange(Pos, AbiType, Box<Exp>),
}

impl Exp {
    pub fn sort(&self) -> Sort {
        match self {
            Exp::LitInt(..)
            | Exp::Var(..)
            | Exp::Read(..)
            | Exp::Add(..)
            | Exp::Sub(..)
            | Exp::Mul(..)
            | Exp::Div(..)
            | Exp::Mod(..)
            | Exp::Pow(..)
            | Exp::Ite(..) => Sort::Integer,
            _ => Sort::Boolean,
        }
    }

    /// Tag-checked coercion: the expression itself if it has the requested
    /// sort.
    pub fn of_sort(&self, sort: Sort) -> Option<&Exp> {
        (self.sort() == sort).then_some(self)
    }

    pub fn lit(v: U256) -> Exp {
        Exp::LitInt(Pos::none(), int_of_word(v))
    }

    pub fn lit_u64(v: u64) -> Exp {
        Exp::lit(U256::from(v))
    }

    pub fn read(contract: impl Into<String>, name: impl Into<String>) -> Exp {
        Exp::Read(
            Pos::none(),
            StorageRef {
                contract: contract.into(),
                name: name.into(),
                when: When::Unspecified,
            },
        )
    }

    /// Rewrite every `Unspecified` storage reference to `when`. Pure; pinned
    /// references are left alone.
    pub fn at(self, when: When) -> Exp {
        self.map(&mut |e| match e {
            Exp::Read(pos, mut item) if item.when == When::Unspecified => {
                item.when = when;
                Exp::Read(pos, item)
            }
            e => e,
        })
    }

    /// Bottom-up structural map.
    pub fn map(self, f: &mut impl FnMut(Exp) -> Exp) -> Exp {
        let descended = match self {
            Exp::Add(p, a, b) => Exp::Add(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Sub(p, a, b) => Exp::Sub(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Mul(p, a, b) => Exp::Mul(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Div(p, a, b) => Exp::Div(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Mod(p, a, b) => Exp::Mod(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Pow(p, a, b) => Exp::Pow(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Ite(p, c, a, b) => Exp::Ite(
                p,
                Box::new(c.map(f)),
                Box::new(a.map(f)),
                Box::new(b.map(f)),
            ),
            Exp::And(p, a, b) => Exp::And(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Or(p, a, b) => Exp::Or(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Not(p, a) => Exp::Not(p, Box::new(a.map(f))),
            Exp::Eq(p, a, b) => Exp::Eq(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Neq(p, a, b) => Exp::Neq(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Lt(p, a, b) => Exp::Lt(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Leq(p, a, b) => Exp::Leq(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Gt(p, a, b) => Exp::Gt(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::Geq(p, a, b) => Exp::Geq(p, Box::new(a.map(f)), Box::new(b.map(f))),
            Exp::InRange(p, ty, a) => Exp::InRange(p, ty, Box::new(a.map(f))),
            leaf => leaf,
        };
        f(descended)
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exp::LitInt(_, v) => write!(f, "{v}"),
            Exp::Var(_, _, name) => write!(f, "{name}"),
            Exp::Read(_, item) => {
                let tag = match item.when {
                    When::Unspecified => "",
                    When::Pre => "pre(",
                    When::Post => "post(",
                };
                let close = if tag.is_empty() { "" } else { ")" };
                write!(f, "{tag}{}.{}{close}", item.contract, item.name)
            }
            Exp::Add(_, a, b) => write!(f, "({a} + {b})"),
            Exp::Sub(_, a, b) => write!(f, "({a} - {b})"),
            Exp::Mul(_, a, b) => write!(f, "({a} * {b})"),
            Exp::Div(_, a, b) => write!(f, "({a} / {b})"),
            Exp::Mod(_, a, b) => write!(f, "({a} % {b})"),
            Exp::Pow(_, a, b) => write!(f, "({a} ^ {b})"),
            Exp::Ite(_, c, a, b) => write!(f, "(if {c} then {a} else {b})"),
            Exp::LitBool(_, v) => write!(f, "{v}"),
            Exp::And(_, a, b) => write!(f, "({a} and {b})"),
            Exp::Or(_, a, b) => write!(f, "({a} or {b})"),
            Exp::Not(_, a) => write!(f, "(not {a})"),
            Exp::Eq(_, a, b) => write!(f, "({a} == {b})"),
            Exp::Neq(_, a, b) => write!(f, "({a} =/= {b})"),
            Exp::Lt(_, a, b) => write!(f, "({a} < {b})"),
            Exp::Leq(_, a, b) => write!(f, "({a} <= {b})"),
            Exp::Gt(_, a, b) => write!(f, "({a} > {b})"),
            Exp::Geq(_, a, b) => write!(f, "({a} >= {b})"),
            Exp::InRange(_, ty, a) => write!(f, "inrange({ty}, {a})"),
        }
    }
}

/// A typed expression; the tag is the declared ABI type of the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypedExp {
    pub ty: AbiType,
    pub exp: Exp,
}

/// Binds a named storage item to its new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageUpdate {
    pub item: StorageRef,
    pub value: Exp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constructor {
    pub interface: Interface,
    pub preconditions: Vec<Exp>,
    pub initial_storage: Vec<StorageUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Behaviour {
    pub name: String,
    pub interface: Interface,
    pub preconditions: Vec<Exp>,
    pub returns: Option<TypedExp>,
    pub storage_updates: Vec<StorageUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecContract {
    pub name: String,
    pub constructor: Constructor,
    pub behaviours: Vec<Behaviour>,
}

/// The full generated specification: one contract plus its storage layout,
/// immutable once produced by the translator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Specification {
    /// contract name -> variable name -> (slot type, slot index)
    pub store_layout: BTreeMap<String, BTreeMap<String, (SlotType, U256)>>,
    pub contract: SpecContract,
}
