//! z3 backend for the [`SmtSolver`] contract.
//!
//! Every query builds a fresh `Solver` on the calling thread's implicit
//! z3 context: z3 contexts are not `Send`, so a shared one cannot cross
//! the blocking-pool boundary. Queries are self-contained conjunctions,
//! so nothing is lost by not reusing solvers.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::U256;
use z3::ast::{Ast, Bool, BV};
use z3::{Params, SatResult, Solver};

use crate::solver::backend::{Model, SmtSolver, Verdict};
use crate::symbolic::expr::{Prop, Word};

#[derive(Debug, Default)]
pub struct Z3Solver;

impl Z3Solver {
    pub fn new() -> Self {
        Z3Solver
    }
}

impl SmtSolver for Z3Solver {
    fn check(&self, assertions: &[Prop], timeout: Duration) -> Verdict {
        let solver = Solver::new();
        configure_solver(&solver, timeout);

        let mut enc = Encoder::new();
        for prop in assertions {
            let encoded = enc.prop(prop);
            solver.assert(&encoded);
        }

        match solver.check() {
            SatResult::Sat => Verdict::Sat(enc.extract_model(&solver)),
            SatResult::Unsat => Verdict::Unsat,
            SatResult::Unknown => Verdict::Unknown,
        }
    }
}

fn configure_solver(solver: &Solver, timeout: Duration) {
    let mut params = Params::new();
    let ms = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
    params.set_u32("timeout", ms);
    params.set_bool("model.partial", true);
    // Deterministic by default.
    params.set_u32("random_seed", 42);
    solver.set_params(&params);
}

/// Zero-slop conversion from a 256-bit integer to a 256-bit BV via
/// big-endian word packing; avoids string parsing which can silently
/// degrade constants.
pub fn bv_from_u256(val: U256) -> BV {
    let bytes = val.to_be_bytes::<32>();
    let mut words = [0u64; 4];
    for (i, word) in words.iter_mut().enumerate() {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
        *word = u64::from_be_bytes(chunk);
    }
    let bv = BV::from_u64(words[0], 64);
    let bv = bv.concat(&BV::from_u64(words[1], 64));
    let bv = bv.concat(&BV::from_u64(words[2], 64));
    bv.concat(&BV::from_u64(words[3], 64))
}

pub fn u256_from_bv(bv: &BV) -> Option<U256> {
    let simplified = bv.simplify();
    if let Some(val) = simplified.as_u64() {
        return Some(U256::from(val));
    }
    parse_numeral(&simplified.to_string())
}

fn parse_numeral(s: &str) -> Option<U256> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("#x") {
        return U256::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = s.strip_prefix("#b") {
        return U256::from_str_radix(bin, 2).ok();
    }
    if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() {
        return U256::from_str_radix(s, 10).ok();
    }
    None
}

struct Encoder {
    vars: HashMap<String, BV>,
    sloads: HashMap<Word, (String, BV)>,
    opaques: HashMap<Word, BV>,
}

impl Encoder {
    fn new() -> Self {
        Encoder {
            vars: HashMap::new(),
            sloads: HashMap::new(),
            opaques: HashMap::new(),
        }
    }

    fn var(&mut self, name: &str) -> BV {
        if let Some(bv) = self.vars.get(name) {
            return bv.clone();
        }
        let bv = BV::new_const(name, 256);
        self.vars.insert(name.to_string(), bv.clone());
        bv
    }

    /// Storage reads are uninterpreted: one fresh constant per distinct slot
    /// expression, shared across the whole query so both sides of an
    /// equivalence check observe the same prior storage.
    fn sload(&mut self, slot: &Word) -> BV {
        if let Some((_, bv)) = self.sloads.get(slot) {
            return bv.clone();
        }
        let name = format!("storage[{slot}]");
        let bv = BV::new_const(name.as_str(), 256);
        self.sloads.insert(slot.clone(), (name, bv.clone()));
        bv
    }

    /// Unconstrained constant for a term the backend cannot encode, shared
    /// by structural identity so the same term on both sides of an equality
    /// refers to one value. Widening: any UNSAT proved over the widened
    /// formula holds for the original.
    fn opaque(&mut self, tag: &str, term: &Word) -> BV {
        if let Some(bv) = self.opaques.get(term) {
            return bv.clone();
        }
        let name = format!("{tag}[{term}]");
        let bv = BV::new_const(name.as_str(), 256);
        self.opaques.insert(term.clone(), bv.clone());
        bv
    }

    fn word(&mut self, w: &Word) -> BV {
        match w {
            Word::Lit(v) => bv_from_u256(*v),
            Word::Var(name) => self.var(name),
            Word::Add(a, b) => self.word(a).bvadd(&self.word(b)),
            Word::Sub(a, b) => self.word(a).bvsub(&self.word(b)),
            Word::Mul(a, b) => self.word(a).bvmul(&self.word(b)),
            Word::Div(a, b) => {
                // EVM semantics: x / 0 == 0.
                let a = self.word(a);
                let b = self.word(b);
                let zero = BV::from_u64(0, 256);
                b._eq(&zero).ite(&zero, &a.bvudiv(&b))
            }
            Word::Mod(a, b) => {
                let a = self.word(a);
                let b = self.word(b);
                let zero = BV::from_u64(0, 256);
                b._eq(&zero).ite(&zero, &a.bvurem(&b))
            }
            Word::Exp(base, exp) => match exp.as_ref() {
                Word::Lit(e) => {
                    let base = self.word(base);
                    pow_lit(&base, *e)
                }
                // No symbolic-exponent encoding in this backend.
                _ => self.opaque("exp", w),
            },
            Word::SignExtend(bytes, x) => match bytes.as_ref() {
                Word::Lit(b) if *b < U256::from(31) => {
                    let bits = 8 * (b.to::<u64>() as u32 + 1);
                    let x = self.word(x);
                    x.extract(bits - 1, 0).sign_ext(256 - bits)
                }
                _ => self.opaque("signext", w),
            },
            // Identity in the 256-bit domain.
            Word::Wrap(x) => self.word(x),
            Word::Not(x) => self.word(x).bvnot(),
            Word::Ite(p, a, b) => {
                let p = self.prop(p);
                let a = self.word(a);
                let b = self.word(b);
                p.ite(&a, &b)
            }
            Word::SLoad(slot) => self.sload(slot),
        }
    }

    fn prop(&mut self, p: &Prop) -> Bool<'ctx> {
        match p {
            Prop::Bool(b) => Bool::from_bool(self.ctx, *b),
            Prop::Eq(a, b) => self.word(a)._eq(&self.word(b)),
            Prop::Lt(a, b) => self.word(a).bvult(&self.word(b)),
            Prop::Leq(a, b) => self.word(a).bvule(&self.word(b)),
            Prop::Gt(a, b) => self.word(a).bvugt(&self.word(b)),
            Prop::Geq(a, b) => self.word(a).bvuge(&self.word(b)),
            Prop::Not(inner) => self.prop(inner).not(),
            Prop::And(a, b) => {
                let a = self.prop(a);
                let b = self.prop(b);
                Bool::and(self.ctx, &[&a, &b])
            }
            Prop::Or(a, b) => {
                let a = self.prop(a);
                let b = self.prop(b);
                Bool::or(self.ctx, &[&a, &b])
            }
        }
    }

    fn extract_model(&self, solver: &Solver<'ctx>) -> Model {
        let mut out = Model::default();
        let Some(model) = solver.get_model() else {
            return out;
        };
        for (name, bv) in &self.vars {
            if let Some(val) = model.eval(bv, true).as_ref().and_then(u256_from_bv) {
                out.0.insert(name.clone(), val);
            }
        }
        for (name, bv) in self.sloads.values() {
            if let Some(val) = model.eval(bv, true).as_ref().and_then(u256_from_bv) {
                out.0.insert(name.clone(), val);
            }
        }
        out
    }
}

/// Square-and-multiply over the bits of a literal exponent.
fn pow_lit<'ctx>(ctx: &'ctx Context, base: &BV<'ctx>, exp: U256) -> BV<'ctx> {
    let mut acc = BV::from_u64(ctx, 1, 256);
    let bits = exp.bit_len();
    for i in (0..bits).rev() {
        acc = acc.bvmul(&acc);
        if exp.bit(i) {
            acc = acc.bvmul(base);
        }
    }
    acc
}
