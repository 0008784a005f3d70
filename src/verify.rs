//! Three-phase equivalence verification of a generated specification
//! against the original bytecode.
//!
//! The specification's constructor and behaviours are compiled back into
//! symbolic outcomes (guard, return value, storage writes), the original
//! code is re-summarized, and the solver decides per candidate pair that
//! overlapping guards force identical effects. Input-space partitioning is
//! checked separately (within-set disjointness and cross-set coverage), and
//! the runtime dispatch table is scanned so every reachable selector has a
//! satisfiable behaviour guard.
//!
//! All failing queries are collected and reported together; a single Sat or
//! Unknown verdict anywhere makes the report non-clean.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::U256;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::abi::{AbiType, CompiledContract, SlotType, dispatch_selectors};
use crate::error::{DecompileError, Result};
use crate::partition::partition;
use crate::solver::backend::{Model, Verdict};
use crate::solver::pool::SolverPool;
use crate::spec::ast::{word_modulus, word_of_int, Behaviour, Exp, Specification, When};
use crate::summarize::summarize;
use crate::symbolic::engine::SymbolicEngine;
use crate::symbolic::expr::{Buf, Prop, Word};
use crate::symbolic::tree::SuccessOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// An equivalence or disjointness query was satisfiable; the model is a
    /// concrete input exhibiting the divergence.
    Counterexample(Model),
    /// The solver could not decide the query in time. Never an implicit
    /// pass.
    Timeout,
    /// A reachable dispatch selector has no satisfiable behaviour guard.
    CoverageGap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyFailure {
    pub location: String,
    pub kind: FailureKind,
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Counterexample(model) => {
                write!(f, "{}: counterexample {model}", self.location)
            }
            FailureKind::Timeout => write!(f, "{}: solver timeout", self.location),
            FailureKind::CoverageGap => write!(f, "{}: coverage gap", self.location),
        }
    }
}

/// The itemized verification outcome. Failures are sorted by location so the
/// report is deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Machine-readable rendering for downstream tooling.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn push(&mut self, location: impl Into<String>, kind: FailureKind) {
        self.failures.push(VerifyFailure { location: location.into(), kind });
    }

    fn finalize(mut self) -> Self {
        self.failures
            .sort_by(|a, b| a.location.cmp(&b.location));
        self
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "verified, no findings");
        }
        for failure in &self.failures {
            writeln!(f, "  - {failure}")?;
        }
        Ok(())
    }
}

/// One symbolic outcome in guard/effects form, the common shape both sides
/// of an equivalence check are brought into.
#[derive(Debug, Clone)]
struct SymOutcome {
    guard: Prop,
    ret: Option<Word>,
    writes: BTreeMap<U256, Word>,
}

/// Verify `spec` against the original bytecode by re-summarizing it with
/// the same engine. Hard errors (engine failures, unconvertible
/// specification expressions) abort; solver findings land in the report.
pub async fn verify(
    engine: Arc<dyn SymbolicEngine>,
    pool: Arc<SolverPool>,
    spec: &Specification,
    contract: &CompiledContract,
) -> Result<VerifyReport> {
    let summary = summarize(Arc::clone(&engine), Arc::clone(&pool), contract).await?;
    let layout = spec
        .store_layout
        .get(&spec.contract.name)
        .ok_or_else(|| DecompileError::MissingLayout(spec.contract.name.clone()))?;
    let compiler = SpecCompiler { layout };

    let mut queries = Vec::new();
    let mut report = VerifyReport::default();

    // Phase 1: constructor equivalence.
    let ctor = &spec.contract.constructor;
    let spec_ctor = vec![SymOutcome {
        guard: compiler.guard(&ctor.preconditions)?,
        ret: None,
        writes: compiler.writes_of(ctor.initial_storage.iter().map(|u| (&u.item.name, &u.value)))?,
    }];
    let sum_ctor = summary
        .constructor_outcomes
        .iter()
        .map(outcome_effects)
        .collect::<Result<Vec<_>>>()?;
    equivalence_queries("constructor", &spec_ctor, &sum_ctor, &mut queries);

    // Phase 2: behaviour equivalence, per method.
    let mut by_method: BTreeMap<&str, Vec<&Behaviour>> = BTreeMap::new();
    for behaviour in &spec.contract.behaviours {
        by_method.entry(&behaviour.name).or_default().push(behaviour);
    }
    for (name, method_summary) in &summary.methods {
        let Some(behaviours) = by_method.get(name.as_str()) else {
            report.push(format!("method `{name}`"), FailureKind::CoverageGap);
            continue;
        };
        let spec_side = behaviours
            .iter()
            .map(|b| {
                Ok(SymOutcome {
                    guard: compiler.guard(&b.preconditions)?,
                    ret: b.returns.as_ref().map(|r| compiler.word(&r.exp)).transpose()?,
                    writes: compiler
                        .writes_of(b.storage_updates.iter().map(|u| (&u.item.name, &u.value)))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let sum_side = method_summary
            .outcomes
            .iter()
            .map(outcome_effects)
            .collect::<Result<Vec<_>>>()?;
        equivalence_queries(&format!("method `{name}`"), &spec_side, &sum_side, &mut queries);
    }
    // A behaviour naming a method the ABI does not have is a finding, not
    // something to skip.
    for name in by_method.keys() {
        if !summary.methods.contains_key(*name) {
            report.push(
                format!("method `{name}` has behaviours but no ABI entry"),
                FailureKind::CoverageGap,
            );
        }
    }

    // Phase 3: ABI coverage of the dispatch table.
    for selector in dispatch_selectors(&contract.runtime) {
        let location = format!("selector 0x{}", hex::encode(selector));
        let guards: Vec<Prop> = spec
            .contract
            .behaviours
            .iter()
            .filter(|b| b.interface.selector() == selector)
            .map(|b| compiler.guard(&b.preconditions))
            .collect::<Result<Vec<_>>>()?;
        if guards.is_empty() {
            report.push(location, FailureKind::CoverageGap);
            continue;
        }
        queries.push(Query {
            location,
            assertions: vec![Prop::disjoin(guards)],
            expect: Expect::Sat,
        });
    }

    let mut join_set = JoinSet::new();
    for query in queries {
        let pool = Arc::clone(&pool);
        join_set.spawn(async move {
            let verdict = pool.query(query.assertions).await;
            (query.location, query.expect, verdict)
        });
    }
    while let Some(joined) = join_set.join_next().await {
        let (location, expect, verdict) = joined
            .map_err(|err| DecompileError::Engine(format!("verifier task failed: {err:?}")))?;
        match (expect, verdict) {
            (Expect::Unsat, Verdict::Unsat) | (Expect::Sat, Verdict::Sat(_)) => {}
            (Expect::Unsat, Verdict::Sat(model)) => {
                report.push(location, FailureKind::Counterexample(model));
            }
            (Expect::Sat, Verdict::Unsat) => report.push(location, FailureKind::CoverageGap),
            (_, Verdict::Unknown) => report.push(location, FailureKind::Timeout),
        }
    }

    let report = report.finalize();
    tracing::info!(
        contract = %spec.contract.name,
        findings = report.failures.len(),
        "verification finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy)]
enum Expect {
    Unsat,
    Sat,
}

struct Query {
    location: String,
    assertions: Vec<Prop>,
    expect: Expect,
}

/// Emit the equivalence and partitioning queries for one outcome-set pair.
fn equivalence_queries(
    what: &str,
    spec_side: &[SymOutcome],
    sum_side: &[SymOutcome],
    out: &mut Vec<Query>,
) {
    // Overlapping guards must force identical effects. Pairs with disjoint
    // guards discharge trivially inside the same query.
    for (i, a) in spec_side.iter().enumerate() {
        for (j, b) in sum_side.iter().enumerate() {
            out.push(Query {
                location: format!("{what}: effects of spec outcome {i} vs code outcome {j}"),
                assertions: vec![
                    a.guard.clone(),
                    b.guard.clone(),
                    Prop::not(same_effects(a, b)),
                ],
                expect: Expect::Unsat,
            });
        }
    }
    // Within each set, every input is accepted by at most one outcome.
    disjointness_queries(&format!("{what}: spec outcomes"), spec_side, out);
    disjointness_queries(&format!("{what}: code outcomes"), sum_side, out);
    // Cross-set coverage, both directions: neither side accepts an input the
    // other rejects.
    let spec_any = Prop::disjoin(spec_side.iter().map(|o| o.guard.clone()));
    let sum_any = Prop::disjoin(sum_side.iter().map(|o| o.guard.clone()));
    out.push(Query {
        location: format!("{what}: spec accepts inputs the code rejects"),
        assertions: vec![spec_any.clone(), Prop::not(sum_any.clone())],
        expect: Expect::Unsat,
    });
    out.push(Query {
        location: format!("{what}: code accepts inputs the spec rejects"),
        assertions: vec![sum_any, Prop::not(spec_any)],
        expect: Expect::Unsat,
    });
}

fn disjointness_queries(what: &str, outcomes: &[SymOutcome], out: &mut Vec<Query>) {
    for i in 0..outcomes.len() {
        for j in (i + 1)..outcomes.len() {
            out.push(Query {
                location: format!("{what} {i} and {j} overlap"),
                assertions: vec![outcomes[i].guard.clone(), outcomes[j].guard.clone()],
                expect: Expect::Unsat,
            });
        }
    }
}

/// Effects agree: return values match and every touched slot holds the same
/// value, with an untouched slot defaulting to its pre-state load.
fn same_effects(a: &SymOutcome, b: &SymOutcome) -> Prop {
    let ret = match (&a.ret, &b.ret) {
        (None, None) => Prop::Bool(true),
        (Some(x), Some(y)) => Prop::Eq(x.clone(), y.clone()),
        _ => Prop::Bool(false),
    };
    let slots: std::collections::BTreeSet<U256> =
        a.writes.keys().chain(b.writes.keys()).copied().collect();
    let storage = Prop::conjoin(slots.into_iter().map(|slot| {
        let untouched = || Word::sload(Word::Lit(slot));
        let va = a.writes.get(&slot).cloned().unwrap_or_else(untouched);
        let vb = b.writes.get(&slot).cloned().unwrap_or_else(untouched);
        Prop::Eq(va, vb)
    }));
    Prop::and(ret, storage)
}

fn outcome_effects(outcome: &SuccessOutcome) -> Result<SymOutcome> {
    // A non-empty buffer that is not a single zero-offset word cannot be
    // compared against the specification; passing it off as "no return
    // value" would let a data-returning path verify clean.
    let ret = match &outcome.returned {
        Buf::Empty => None,
        buf => Some(buf.as_single_word().cloned().ok_or_else(|| {
            DecompileError::unsupported(format!(
                "unable to convert return buffer `{buf}` for equivalence checking"
            ))
        })?),
    };
    Ok(SymOutcome {
        guard: Prop::conjoin(outcome.conditions.iter().cloned()),
        ret,
        writes: partition(&outcome.storage)?,
    })
}

/// Compiles specification expressions back into the symbolic word/prop
/// grammar, the inverse of the translator's recursive descent.
struct SpecCompiler<'a> {
    layout: &'a BTreeMap<String, (SlotType, U256)>,
}

impl SpecCompiler<'_> {
    fn guard(&self, preconditions: &[Exp]) -> Result<Prop> {
        let props = preconditions
            .iter()
            .map(|p| self.prop(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Prop::conjoin(props))
    }

    fn writes_of<'b>(
        &self,
        updates: impl Iterator<Item = (&'b String, &'b Exp)>,
    ) -> Result<BTreeMap<U256, Word>> {
        let mut out = BTreeMap::new();
        for (name, value) in updates {
            out.insert(self.slot_of(name)?, self.word(value)?);
        }
        Ok(out)
    }

    fn slot_of(&self, name: &str) -> Result<U256> {
        self.layout
            .get(name)
            .map(|(_, slot)| *slot)
            .ok_or_else(|| {
                DecompileError::unsupported(format!(
                    "storage item `{name}` missing from the specification layout"
                ))
            })
    }

    fn word(&self, e: &Exp) -> Result<Word> {
        let bin = |f: fn(Box<Word>, Box<Word>) -> Word, a: &Exp, b: &Exp| -> Result<Word> {
            Ok(f(Box::new(self.word(a)?), Box::new(self.word(b)?)))
        };
        match e {
            Exp::LitInt(_, v) => word_of_int(*v).map(Word::Lit).ok_or_else(|| {
                DecompileError::unsupported(format!("literal `{v}` exceeds the word range"))
            }),
            Exp::Var(_, _, name) => Ok(Word::Var(name.clone())),
            Exp::Read(_, item) => {
                if item.when == When::Post {
                    return Err(DecompileError::unsupported(format!(
                        "post-state read of `{}` in a value position",
                        item.name
                    )));
                }
                Ok(Word::sload(Word::Lit(self.slot_of(&item.name)?)))
            }
            // An explicit reduction modulo 2^256 is the identity in the
            // 256-bit domain.
            Exp::Mod(_, x, m)
                if matches!(&**m, Exp::LitInt(_, v) if *v == word_modulus()) =>
            {
                Ok(Word::Wrap(Box::new(self.word(x)?)))
            }
            Exp::Add(_, a, b) => bin(Word::Add, a, b),
            Exp::Sub(_, a, b) => bin(Word::Sub, a, b),
            Exp::Mul(_, a, b) => bin(Word::Mul, a, b),
            Exp::Div(_, a, b) => bin(Word::Div, a, b),
            Exp::Mod(_, a, b) => bin(Word::Mod, a, b),
            Exp::Pow(_, a, b) => bin(Word::Exp, a, b),
            Exp::Ite(_, c, a, b) => Ok(Word::Ite(
                Box::new(self.prop(c)?),
                Box::new(self.word(a)?),
                Box::new(self.word(b)?),
            )),
            other => Err(DecompileError::unsupported(format!(
                "unable to compile `{other}` into a machine word"
            ))),
        }
    }

    fn prop(&self, e: &Exp) -> Result<Prop> {
        let cmp = |f: fn(Word, Word) -> Prop, a: &Exp, b: &Exp| -> Result<Prop> {
            Ok(f(self.word(a)?, self.word(b)?))
        };
        match e {
            Exp::LitBool(_, b) => Ok(Prop::Bool(*b)),
            Exp::And(_, a, b) => Ok(Prop::and(self.prop(a)?, self.prop(b)?)),
            Exp::Or(_, a, b) => Ok(Prop::or(self.prop(a)?, self.prop(b)?)),
            Exp::Not(_, a) => Ok(Prop::not(self.prop(a)?)),
            Exp::Eq(_, a, b) => cmp(Prop::Eq, a, b),
            Exp::Neq(_, a, b) => Ok(Prop::not(cmp(Prop::Eq, a, b)?)),
            Exp::Lt(_, a, b) => cmp(Prop::Lt, a, b),
            Exp::Leq(_, a, b) => cmp(Prop::Leq, a, b),
            Exp::Gt(_, a, b) => cmp(Prop::Gt, a, b),
            Exp::Geq(_, a, b) => cmp(Prop::Geq, a, b),
            Exp::InRange(_, ty, inner) => self.in_range(ty, inner),
            other => Err(DecompileError::unsupported(format!(
                "unable to compile `{other}` into a proposition"
            ))),
        }
    }

    /// In-range assertions on full-word sums and products compile back into
    /// the canonical machine-level overflow checks; narrower types compare
    /// against the type's upper bound.
    fn in_range(&self, ty: &AbiType, inner: &Exp) -> Result<Prop> {
        if *ty == AbiType::UInt(256) {
            match inner {
                Exp::Add(_, a, b) => {
                    let a = self.word(a)?;
                    let b = self.word(b)?;
                    return Ok(Prop::Leq(a, Word::Not(Box::new(b))));
                }
                Exp::Mul(_, a, b) => {
                    let a = self.word(a)?;
                    let b = self.word(b)?;
                    return Ok(Prop::or(
                        Prop::Eq(a.clone(), Word::Lit(U256::ZERO)),
                        Prop::Leq(
                            b,
                            Word::Div(Box::new(Word::Lit(U256::MAX)), Box::new(a)),
                        ),
                    ));
                }
                _ => {}
            }
        }
        let bound = ty.upper_bound().ok_or_else(|| {
            DecompileError::unsupported(format!("in-range assertion on `{ty}`"))
        })?;
        Ok(Prop::Leq(self.word(inner)?, Word::Lit(bound)))
    }
}
