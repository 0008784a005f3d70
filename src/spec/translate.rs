//! Translation of summarized, safety-normalized outcomes into the
//! specification AST.

use std::collections::BTreeMap;

use alloy::primitives::U256;
use itertools::Itertools;

use crate::abi::{AbiType, Decl, Method};
use crate::error::{DecompileError, Result};
use crate::partition::partition;
use crate::spec::ast::{
    int_of_word, word_modulus, Behaviour, Constructor, Exp, Pos, SpecContract, Specification,
    StorageRef, StorageUpdate, TypedExp, When,
};
use crate::spec::simplify::simplify;
use crate::summarize::{pretty_conditions, ContractSummary};
use crate::symbolic::expr::{Buf, Prop, Word};
use crate::symbolic::tree::SuccessOutcome;

struct TranslateCtx<'a> {
    summary: &'a ContractSummary,
    params: &'a [Decl],
}

impl TranslateCtx<'_> {
    fn param_type(&self, name: &str) -> Result<AbiType> {
        self.params
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.ty.clone())
            .ok_or_else(|| {
                DecompileError::unsupported(format!(
                    "reference to undeclared calldata word `{name}`"
                ))
            })
    }
}

pub fn translate(summary: &ContractSummary) -> Result<Specification> {
    let constructor = translate_constructor(summary)?;

    let mut behaviours = Vec::new();
    for method_summary in summary.methods.values() {
        for outcome in &method_summary.outcomes {
            behaviours.push(translate_behaviour(summary, &method_summary.method, outcome)?);
        }
    }

    let mut layout = BTreeMap::new();
    for entry in &summary.layout.entries {
        layout.insert(entry.label.clone(), (entry.ty.clone(), entry.slot));
    }
    let mut store_layout = BTreeMap::new();
    store_layout.insert(summary.name.clone(), layout);

    Ok(Specification {
        store_layout,
        contract: SpecContract {
            name: summary.name.clone(),
            constructor,
            behaviours,
        },
    })
}

fn translate_constructor(summary: &ContractSummary) -> Result<Constructor> {
    let mut outcomes = summary.constructor_outcomes.iter();
    let (Some(outcome), None) = (outcomes.next(), outcomes.next()) else {
        let paths: Vec<String> = summary
            .constructor_outcomes
            .iter()
            .map(|o| pretty_conditions(&o.conditions))
            .collect();
        return Err(DecompileError::unsupported(format!(
            "decompile constructors with multiple branches:\n  - {}",
            paths.join("\n  - ")
        )));
    };
    let ctx = TranslateCtx { summary, params: &summary.constructor_interface.decls };
    Ok(Constructor {
        interface: summary.constructor_interface.clone(),
        preconditions: preconditions(&ctx, &outcome.conditions)?,
        initial_storage: storage_updates(&ctx, outcome)?,
    })
}

fn translate_behaviour(
    summary: &ContractSummary,
    method: &Method,
    outcome: &SuccessOutcome,
) -> Result<Behaviour> {
    let ctx = TranslateCtx { summary, params: &method.inputs };
    Ok(Behaviour {
        name: method.name.clone(),
        interface: method.interface(),
        preconditions: preconditions(&ctx, &outcome.conditions)?,
        returns: translate_return(&ctx, method, &outcome.returned)?,
        storage_updates: storage_updates(&ctx, outcome)?,
    })
}

/// Flatten top-level conjunctions, deduplicate, translate and simplify.
fn preconditions(ctx: &TranslateCtx<'_>, conditions: &[Prop]) -> Result<Vec<Exp>> {
    let mut flat = Vec::new();
    for cond in conditions {
        cond.conjuncts(&mut flat);
    }
    let flat: Vec<Prop> = flat.into_iter().unique().collect();

    let mut out = Vec::new();
    for prop in &flat {
        let exp = simplify(from_prop(ctx, prop)?.at(When::Pre));
        if matches!(exp, Exp::LitBool(_, true)) {
            continue;
        }
        if !out.contains(&exp) {
            out.push(exp);
        }
    }
    Ok(out)
}

fn translate_return(
    ctx: &TranslateCtx<'_>,
    method: &Method,
    returned: &Buf,
) -> Result<Option<TypedExp>> {
    match method.outputs.as_slice() {
        [] => match returned {
            Buf::Empty => Ok(None),
            buf => Err(DecompileError::unsupported(format!(
                "method `{}` declares no outputs but returns `{buf}`",
                method.name
            ))),
        },
        [ty] => {
            match ty {
                AbiType::Tuple(_) => {
                    return Err(DecompileError::unsupported(format!(
                        "tuple return type `{ty}` of method `{}`",
                        method.name
                    )))
                }
                AbiType::Function => {
                    return Err(DecompileError::unsupported(format!(
                        "function-pointer return type of method `{}`",
                        method.name
                    )))
                }
                ty if !ty.is_static_word() => {
                    return Err(DecompileError::unsupported(format!(
                        "dynamically-sized return type `{ty}` of method `{}`",
                        method.name
                    )))
                }
                _ => {}
            }
            let word = returned.as_single_word().ok_or_else(|| {
                DecompileError::unsupported(format!(
                    "method `{}` declares one output but returns `{returned}`",
                    method.name
                ))
            })?;
            let exp = simplify(from_word(ctx, word)?.at(When::Pre));
            Ok(Some(TypedExp { ty: ty.clone(), exp }))
        }
        outputs => Err(DecompileError::unsupported(format!(
            "{} return values of method `{}`",
            outputs.len(),
            method.name
        ))),
    }
}

/// Partition the final storage and bind each written scalar slot to its new
/// value. Non-scalar and undeclared slots are explicit unsupported errors.
fn storage_updates(ctx: &TranslateCtx<'_>, outcome: &SuccessOutcome) -> Result<Vec<StorageUpdate>> {
    let slots = partition(&outcome.storage)?;
    let mut out = Vec::new();
    for (slot, value) in &slots {
        let entry = ctx.summary.layout.by_slot(*slot).ok_or_else(|| {
            DecompileError::unsupported(format!(
                "write to storage slot {slot:#x} outside the declared layout"
            ))
        })?;
        if !entry.ty.is_scalar() {
            return Err(DecompileError::unsupported(format!(
                "write to non-scalar storage item `{}` of type `{}`",
                entry.label, entry.ty
            )));
        }
        let value = simplify(from_word(ctx, value)?.at(When::Pre));
        out.push(StorageUpdate {
            item: StorageRef {
                contract: ctx.summary.name.clone(),
                name: entry.label.clone(),
                when: When::Post,
            },
            value,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Overflow-idiom recognition.
//
// An ordered list of structural matchers tried before the generic descent.
// Heuristic and extensible, not exhaustive: a rule that matches returns the
// product/sum word whose in-range assertion replaces the raw check.

type IdiomRule = fn(&Prop) -> Option<Word>;

static IDIOM_RULES: &[(&str, IdiomRule)] = &[
    ("unsigned-add-overflow", match_add_overflow),
    ("unsigned-mul-overflow", match_mul_overflow),
];

/// The canonical unsigned-addition overflow check compares one operand
/// against the bitwise negation of the other: `a <= ~b` iff `a + b` does
/// not wrap.
fn match_add_overflow(p: &Prop) -> Option<Word> {
    let sum = |a: &Word, b: &Word| Word::Add(Box::new(a.clone()), Box::new(b.clone()));
    match p {
        Prop::Leq(a, Word::Not(b)) => Some(sum(a, b.as_ref())),
        Prop::Geq(Word::Not(b), a) => Some(sum(a, b.as_ref())),
        Prop::Not(inner) => match &**inner {
            Prop::Gt(a, Word::Not(b)) => Some(sum(a, b.as_ref())),
            Prop::Lt(Word::Not(b), a) => Some(sum(a, b.as_ref())),
            _ => None,
        },
        _ => None,
    }
}

/// The canonical unsigned-multiplication overflow check: either the
/// divisor-side operand is zero, or the other operand is bounded by
/// `MAX / a`.
fn match_mul_overflow(p: &Prop) -> Option<Word> {
    let Prop::Or(x, y) = p else {
        return None;
    };
    for (zero_side, bound_side) in [(&**x, &**y), (&**y, &**x)] {
        let Some(a) = match_zero_check(zero_side) else {
            continue;
        };
        if let Some(b) = match_div_bound(bound_side, &a) {
            return Some(Word::Mul(Box::new(a), Box::new(b)));
        }
    }
    None
}

fn match_zero_check(p: &Prop) -> Option<Word> {
    match p {
        Prop::Eq(a, Word::Lit(z)) if z.is_zero() => Some(a.clone()),
        Prop::Eq(Word::Lit(z), a) if z.is_zero() => Some(a.clone()),
        _ => None,
    }
}

/// Matches `b <= MAX / a` (or the flipped `MAX / a >= b`) for the given
/// zero-checked operand `a`, returning `b`.
fn match_div_bound(p: &Prop, a: &Word) -> Option<Word> {
    let is_max_div = |w: &Word| -> bool {
        matches!(w, Word::Div(num, den)
            if matches!(**num, Word::Lit(m) if m == U256::MAX) && **den == *a)
    };
    match p {
        Prop::Leq(b, bound) if is_max_div(bound) => Some(b.clone()),
        Prop::Geq(bound, b) if is_max_div(bound) => Some(b.clone()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Generic recursive descent.

fn from_prop(ctx: &TranslateCtx<'_>, p: &Prop) -> Result<Exp> {
    for (name, rule) in IDIOM_RULES {
        if let Some(word) = rule(p) {
            tracing::debug!(rule = name, "recognized overflow idiom");
            return Ok(Exp::InRange(
                Pos::none(),
                AbiType::UInt(256),
                Box::new(from_word(ctx, &word)?),
            ));
        }
    }
    let bin = |f: fn(Pos, Box<Exp>, Box<Exp>) -> Exp, a: &Word, b: &Word| -> Result<Exp> {
        Ok(f(
            Pos::none(),
            Box::new(from_word(ctx, a)?),
            Box::new(from_word(ctx, b)?),
        ))
    };
    match p {
        Prop::Bool(b) => Ok(Exp::LitBool(Pos::none(), *b)),
        Prop::Eq(a, b) => bin(Exp::Eq, a, b),
        Prop::Lt(a, b) => bin(Exp::Lt, a, b),
        Prop::Leq(a, b) => bin(Exp::Leq, a, b),
        Prop::Gt(a, b) => bin(Exp::Gt, a, b),
        Prop::Geq(a, b) => bin(Exp::Geq, a, b),
        Prop::Not(inner) => Ok(Exp::Not(Pos::none(), Box::new(from_prop(ctx, inner)?))),
        Prop::And(a, b) => Ok(Exp::And(
            Pos::none(),
            Box::new(from_prop(ctx, a)?),
            Box::new(from_prop(ctx, b)?),
        )),
        Prop::Or(a, b) => Ok(Exp::Or(
            Pos::none(),
            Box::new(from_prop(ctx, a)?),
            Box::new(from_prop(ctx, b)?),
        )),
    }
}

fn from_word(ctx: &TranslateCtx<'_>, w: &Word) -> Result<Exp> {
    let bin = |f: fn(Pos, Box<Exp>, Box<Exp>) -> Exp, a: &Word, b: &Word| -> Result<Exp> {
        Ok(f(
            Pos::none(),
            Box::new(from_word(ctx, a)?),
            Box::new(from_word(ctx, b)?),
        ))
    };
    match w {
        Word::Lit(v) => Ok(Exp::LitInt(Pos::none(), int_of_word(*v))),
        Word::Var(name) => Ok(Exp::Var(Pos::none(), ctx.param_type(name)?, name.clone())),
        Word::Add(a, b) => bin(Exp::Add, a, b),
        Word::Sub(a, b) => bin(Exp::Sub, a, b),
        Word::Mul(a, b) => bin(Exp::Mul, a, b),
        Word::Div(a, b) => bin(Exp::Div, a, b),
        Word::Mod(a, b) => bin(Exp::Mod, a, b),
        Word::Exp(a, b) => bin(Exp::Pow, a, b),
        Word::Wrap(inner) => Ok(Exp::Mod(
            Pos::none(),
            Box::new(from_word(ctx, inner)?),
            Box::new(Exp::LitInt(Pos::none(), word_modulus())),
        )),
        Word::Ite(p, a, b) => Ok(Exp::Ite(
            Pos::none(),
            Box::new(from_prop(ctx, p)?),
            Box::new(from_word(ctx, a)?),
            Box::new(from_word(ctx, b)?),
        )),
        Word::SLoad(slot) => {
            let Word::Lit(slot) = &**slot else {
                return Err(DecompileError::unsupported(format!(
                    "storage read at symbolic slot `{slot}`"
                )));
            };
            let entry = ctx.summary.layout.by_slot(*slot).ok_or_else(|| {
                DecompileError::unsupported(format!(
                    "storage read at slot {slot:#x} outside the declared layout"
                ))
            })?;
            if !entry.ty.is_scalar() {
                return Err(DecompileError::unsupported(format!(
                    "storage read of non-scalar item `{}`",
                    entry.label
                )));
            }
            Ok(Exp::Read(
                Pos::none(),
                StorageRef {
                    contract: ctx.summary.name.clone(),
                    name: entry.label.clone(),
                    when: When::Unspecified,
                },
            ))
        }
        // Bitwise negation and sign extension survive only inside
        // recognized idioms.
        other => Err(DecompileError::unsupported(format!(
            "unable to convert `{other}` into a specification expression"
        ))),
    }
}
