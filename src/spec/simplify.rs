//! Boolean simplification of specification expressions.
//!
//! A small confluent rewrite system applied bottom-up until a fixed point:
//! double negation, the boolean-as-integer round-trip through ITE, boolean
//! unit folding, and the classic guarded-multiplication idiom
//! (`a == 0 || (a * b) / a == b`) which folds to a single in-range
//! assertion on the product.

use alloy::primitives::aliases::I512;
use alloy::primitives::U512;

use crate::abi::AbiType;
use crate::spec::ast::{Exp, Pos};

/// Rewrite to a fixed point. Applying this twice is the same as applying it
/// once.
pub fn simplify(e: Exp) -> Exp {
    let mut current = e;
    loop {
        let next = current.clone().map(&mut rewrite);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn is_lit(e: &Exp, v: u64) -> bool {
    matches!(e, Exp::LitInt(_, i) if *i == I512::from_raw(U512::from(v)))
}

fn rewrite(e: Exp) -> Exp {
    match e {
        // not (not p)  ~>  p
        Exp::Not(_, inner) => match *inner {
            Exp::Not(_, p) => *p,
            Exp::LitBool(pos, b) => Exp::LitBool(pos, !b),
            p => Exp::Not(Pos::none(), Box::new(p)),
        },
        // ite(p, 1, 0) == 1  ~>  p      ite(p, 1, 0) == 0  ~>  not p
        Exp::Eq(pos, a, b) => {
            if let Some(folded) = fold_bool_roundtrip(&a, &b) {
                folded
            } else if let Some(folded) = fold_bool_roundtrip(&b, &a) {
                folded
            } else {
                Exp::Eq(pos, a, b)
            }
        }
        Exp::And(pos, a, b) => match (*a, *b) {
            (Exp::LitBool(_, true), p) | (p, Exp::LitBool(_, true)) => p,
            (Exp::LitBool(_, false), _) | (_, Exp::LitBool(_, false)) => {
                Exp::LitBool(pos, false)
            }
            (a, b) => Exp::And(pos, Box::new(a), Box::new(b)),
        },
        Exp::Or(pos, a, b) => {
            if let Some(folded) = fold_safemath_mul(&a, &b) {
                return folded;
            }
            match (*a, *b) {
                (Exp::LitBool(_, false), p) | (p, Exp::LitBool(_, false)) => p,
                (Exp::LitBool(_, true), _) | (_, Exp::LitBool(_, true)) => {
                    Exp::LitBool(pos, true)
                }
                (a, b) => Exp::Or(pos, Box::new(a), Box::new(b)),
            }
        }
        e => e,
    }
}

/// `ite(p, 1, 0) == 1` and `ite(p, 1, 0) == 0`.
fn fold_bool_roundtrip(ite: &Exp, lit: &Exp) -> Option<Exp> {
    let Exp::Ite(_, cond, then, els) = ite else {
        return None;
    };
    if !(is_lit(then, 1) && is_lit(els, 0)) {
        return None;
    }
    if is_lit(lit, 1) {
        Some((**cond).clone())
    } else if is_lit(lit, 0) {
        Some(Exp::Not(Pos::none(), cond.clone()))
    } else {
        None
    }
}

/// SafeMath multiplication guard: `a == 0 || (a * b) / a == b` (modulo
/// operand order) asserts exactly that `a * b` fits in a word.
fn fold_safemath_mul(lhs: &Exp, rhs: &Exp) -> Option<Exp> {
    let (zero_side, div_side) = if is_zero_check(lhs).is_some() {
        (lhs, rhs)
    } else if is_zero_check(rhs).is_some() {
        (rhs, lhs)
    } else {
        return None;
    };
    let a = is_zero_check(zero_side)?;
    let (x, y, q) = is_div_recovery(div_side)?;
    // The divisor must be the zero-checked operand, and division must
    // recover the other factor.
    if x == a && q == y {
        Some(Exp::InRange(
            Pos::none(),
            AbiType::UInt(256),
            Box::new(Exp::Mul(Pos::none(), Box::new(x), Box::new(y))),
        ))
    } else if y == a && q == x {
        Some(Exp::InRange(
            Pos::none(),
            AbiType::UInt(256),
            Box::new(Exp::Mul(Pos::none(), Box::new(x), Box::new(y))),
        ))
    } else {
        None
    }
}

/// Matches `e == 0` / `0 == e`, returning `e`.
fn is_zero_check(e: &Exp) -> Option<Exp> {
    let Exp::Eq(_, a, b) = e else {
        return None;
    };
    if is_lit(b, 0) {
        Some((**a).clone())
    } else if is_lit(a, 0) {
        Some((**b).clone())
    } else {
        None
    }
}

/// Matches `(x * y) / d == q` (either orientation of the equality),
/// returning `(x, y, q)` with `d` required to equal `x`.
fn is_div_recovery(e: &Exp) -> Option<(Exp, Exp, Exp)> {
    let Exp::Eq(_, lhs, rhs) = e else {
        return None;
    };
    for (div, other) in [(lhs, rhs), (rhs, lhs)] {
        if let Exp::Div(_, num, den) = &**div {
            if let Exp::Mul(_, x, y) = &**num {
                if **x == **den {
                    return Some(((**x).clone(), (**y).clone(), (**other).clone()));
                }
                if **y == **den {
                    return Some(((**y).clone(), (**x).clone(), (**other).clone()));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ast::Pos;

    fn var(name: &str) -> Exp {
        Exp::Var(Pos::none(), AbiType::UInt(256), name.to_string())
    }

    fn not(e: Exp) -> Exp {
        Exp::Not(Pos::none(), Box::new(e))
    }

    fn eq(a: Exp, b: Exp) -> Exp {
        Exp::Eq(Pos::none(), Box::new(a), Box::new(b))
    }

    #[test]
    fn test_double_negation() {
        let p = eq(var("a"), var("b"));
        assert_eq!(simplify(not(not(p.clone()))), p);
    }

    #[test]
    fn test_bool_as_integer_roundtrip() {
        let p = eq(var("a"), var("b"));
        let ite = Exp::Ite(
            Pos::none(),
            Box::new(p.clone()),
            Box::new(Exp::lit_u64(1)),
            Box::new(Exp::lit_u64(0)),
        );
        assert_eq!(simplify(eq(ite.clone(), Exp::lit_u64(1))), p);
        assert_eq!(simplify(eq(ite, Exp::lit_u64(0))), not(p));
    }

    #[test]
    fn test_safemath_mul_idiom_folds_to_inrange() {
        // a == 0 || (a * b) / a == b
        let a = var("a");
        let b = var("b");
        let mul = Exp::Mul(Pos::none(), Box::new(a.clone()), Box::new(b.clone()));
        let guard = Exp::Or(
            Pos::none(),
            Box::new(eq(a.clone(), Exp::lit_u64(0))),
            Box::new(eq(
                Exp::Div(Pos::none(), Box::new(mul.clone()), Box::new(a.clone())),
                b.clone(),
            )),
        );
        let expect = Exp::InRange(Pos::none(), AbiType::UInt(256), Box::new(mul));
        assert_eq!(simplify(guard), expect);
    }

    #[test]
    fn test_simplify_is_idempotent() {
        let p = eq(var("a"), var("b"));
        let messy = not(not(Exp::And(
            Pos::none(),
            Box::new(Exp::LitBool(Pos::none(), true)),
            Box::new(p),
        )));
        let once = simplify(messy.clone());
        assert_eq!(simplify(once.clone()), once);
    }
}
