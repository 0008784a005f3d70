//! The symbolic expression grammar shared by the engine seam, the safety
//! normalizer, the translator and the verifier.
//!
//! `Word` is the 256-bit machine-word sort, `Prop` the boolean sort. Keeping
//! the two sorts as separate enums makes ill-sorted terms unrepresentable
//! without type-level indexing; the specification AST (which mixes sorts in
//! one enum) carries an explicit sort tag instead, see `spec::ast`.

use std::collections::BTreeMap;
use std::fmt;

use alloy::primitives::U256;

/// A 256-bit machine word. Arithmetic is modulo 2^256 unless a node is
/// wrapped in [`Word::Wrap`], which marks the value as explicitly reduced
/// when read back in the unbounded-integer domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Word {
    Lit(U256),
    /// Named symbolic input word, one per ABI parameter.
    Var(String),
    Add(Box<Word>, Box<Word>),
    Sub(Box<Word>, Box<Word>),
    Mul(Box<Word>, Box<Word>),
    Div(Box<Word>, Box<Word>),
    Mod(Box<Word>, Box<Word>),
    Exp(Box<Word>, Box<Word>),
    SignExtend(Box<Word>, Box<Word>),
    /// Explicit wraparound marker inserted by the safety normalizer. In the
    /// 256-bit domain this is the identity.
    Wrap(Box<Word>),
    /// Bitwise negation.
    Not(Box<Word>),
    Ite(Box<Prop>, Box<Word>, Box<Word>),
    /// Read of the pre-call storage at the given slot.
    SLoad(Box<Word>),
}

impl Word {
    pub fn lit(v: u64) -> Word {
        Word::Lit(U256::from(v))
    }

    pub fn var(name: impl Into<String>) -> Word {
        Word::Var(name.into())
    }

    pub fn is_lit(&self) -> bool {
        matches!(self, Word::Lit(_))
    }

    /// Smart constructor: folds literal operands (EVM wrapping semantics).
    pub fn add(a: Word, b: Word) -> Word {
        match (a, b) {
            (Word::Lit(x), Word::Lit(y)) => Word::Lit(x.wrapping_add(y)),
            (a, b) => Word::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn sub(a: Word, b: Word) -> Word {
        match (a, b) {
            (Word::Lit(x), Word::Lit(y)) => Word::Lit(x.wrapping_sub(y)),
            (a, b) => Word::Sub(Box::new(a), Box::new(b)),
        }
    }

    pub fn mul(a: Word, b: Word) -> Word {
        match (a, b) {
            (Word::Lit(x), Word::Lit(y)) => Word::Lit(x.wrapping_mul(y)),
            (a, b) => Word::Mul(Box::new(a), Box::new(b)),
        }
    }

    /// EVM division: x / 0 == 0.
    pub fn div(a: Word, b: Word) -> Word {
        match (a, b) {
            (Word::Lit(x), Word::Lit(y)) => Word::Lit(if y.is_zero() {
                U256::ZERO
            } else {
                x / y
            }),
            (a, b) => Word::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn sload(slot: Word) -> Word {
        Word::SLoad(Box::new(slot))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Lit(v) => write!(f, "{v:#x}"),
            Word::Var(n) => write!(f, "{n}"),
            Word::Add(a, b) => write!(f, "({a} + {b})"),
            Word::Sub(a, b) => write!(f, "({a} - {b})"),
            Word::Mul(a, b) => write!(f, "({a} * {b})"),
            Word::Div(a, b) => write!(f, "({a} / {b})"),
            Word::Mod(a, b) => write!(f, "({a} % {b})"),
            Word::Exp(a, b) => write!(f, "({a} ** {b})"),
            Word::SignExtend(b, x) => write!(f, "signextend({b}, {x})"),
            Word::Wrap(x) => write!(f, "wrap256({x})"),
            Word::Not(x) => write!(f, "~{x}"),
            Word::Ite(p, a, b) => write!(f, "ite({p}, {a}, {b})"),
            Word::SLoad(slot) => write!(f, "sload({slot})"),
        }
    }
}

/// A boolean proposition over machine words.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prop {
    Bool(bool),
    Eq(Word, Word),
    Lt(Word, Word),
    Leq(Word, Word),
    Gt(Word, Word),
    Geq(Word, Word),
    Not(Box<Prop>),
    And(Box<Prop>, Box<Prop>),
    Or(Box<Prop>, Box<Prop>),
}

impl Prop {
    pub fn not(p: Prop) -> Prop {
        match p {
            Prop::Bool(b) => Prop::Bool(!b),
            Prop::Not(inner) => *inner,
            p => Prop::Not(Box::new(p)),
        }
    }

    pub fn and(a: Prop, b: Prop) -> Prop {
        match (a, b) {
            (Prop::Bool(true), p) | (p, Prop::Bool(true)) => p,
            (Prop::Bool(false), _) | (_, Prop::Bool(false)) => Prop::Bool(false),
            (a, b) => Prop::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn or(a: Prop, b: Prop) -> Prop {
        match (a, b) {
            (Prop::Bool(false), p) | (p, Prop::Bool(false)) => p,
            (Prop::Bool(true), _) | (_, Prop::Bool(true)) => Prop::Bool(true),
            (a, b) => Prop::Or(Box::new(a), Box::new(b)),
        }
    }

    pub fn conjoin(props: impl IntoIterator<Item = Prop>) -> Prop {
        props
            .into_iter()
            .fold(Prop::Bool(true), Prop::and)
    }

    pub fn disjoin(props: impl IntoIterator<Item = Prop>) -> Prop {
        props
            .into_iter()
            .fold(Prop::Bool(false), Prop::or)
    }

    /// Flatten top-level conjunctions into `out`.
    pub fn conjuncts(&self, out: &mut Vec<Prop>) {
        match self {
            Prop::And(a, b) => {
                a.conjuncts(out);
                b.conjuncts(out);
            }
            Prop::Bool(true) => {}
            p => out.push(p.clone()),
        }
    }
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Bool(b) => write!(f, "{b}"),
            Prop::Eq(a, b) => write!(f, "({a} == {b})"),
            Prop::Lt(a, b) => write!(f, "({a} < {b})"),
            Prop::Leq(a, b) => write!(f, "({a} <= {b})"),
            Prop::Gt(a, b) => write!(f, "({a} > {b})"),
            Prop::Geq(a, b) => write!(f, "({a} >= {b})"),
            Prop::Not(p) => write!(f, "!{p}"),
            Prop::And(a, b) => write!(f, "({a} && {b})"),
            Prop::Or(a, b) => write!(f, "({a} || {b})"),
        }
    }
}

/// Final-storage expression: a chain of writes over a base store, outermost
/// write first (most recent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Store {
    /// Unconstrained prior storage.
    Abstract,
    /// Fully concrete base store.
    Concrete(BTreeMap<U256, U256>),
    Write {
        slot: Word,
        value: Word,
        prev: Box<Store>,
    },
}

impl Store {
    pub fn write(slot: Word, value: Word, prev: Store) -> Store {
        Store::Write { slot, value, prev: Box::new(prev) }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Store::Abstract => write!(f, "<storage>"),
            Store::Concrete(map) => write!(f, "<concrete:{}>", map.len()),
            Store::Write { slot, value, prev } => {
                write!(f, "sstore({slot}, {value}, {prev})")
            }
        }
    }
}

/// Return-data buffer. Only whole-word writes are modelled; anything richer
/// is rejected by the translator as unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Buf {
    Empty,
    /// Fresh unconstrained buffer.
    Abstract(String),
    WriteWord {
        offset: Word,
        value: Word,
        prev: Box<Buf>,
    },
}

impl Buf {
    /// A buffer consisting of exactly one word written at offset zero.
    pub fn single_word(value: Word) -> Buf {
        Buf::WriteWord {
            offset: Word::Lit(U256::ZERO),
            value,
            prev: Box::new(Buf::Empty),
        }
    }

    /// Extract the single returned word, if the buffer has exactly that
    /// shape.
    pub fn as_single_word(&self) -> Option<&Word> {
        match self {
            Buf::WriteWord { offset: Word::Lit(off), value, prev }
                if off.is_zero() && matches!(**prev, Buf::Empty) =>
            {
                Some(value)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Buf::Empty => write!(f, "<empty>"),
            Buf::Abstract(name) => write!(f, "<buf:{name}>"),
            Buf::WriteWord { offset, value, prev } => {
                write!(f, "writeword({offset}, {value}, {prev})")
            }
        }
    }
}
