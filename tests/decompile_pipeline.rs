//! End-to-end pipeline runs against the real z3 backend: summarize,
//! translate, verify, and check the generated specification's shape.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Bytes;
use retrospec::abi::AbiType;
use retrospec::solver::{SolverPool, Z3Solver};
use retrospec::spec::ast::{Exp, Pos, StorageRef, When, word_modulus};
use retrospec::symbolic::expr::{Buf, Prop, Store, Word};
use retrospec::symbolic::tree::{ExecTree, Leaf};
use retrospec::verify::FailureKind;
use retrospec::{decompile, verify, DecompileError};

use common::{contract, dispatch_stub, scalar_layout, uint_method, ScriptedEngine};

fn sload0() -> Word {
    Word::sload(Word::lit(0))
}

fn success(conditions: Vec<Prop>, returned: Buf, storage: Store) -> ExecTree {
    ExecTree::leaf(Leaf::Success { conditions, returned, storage })
}

fn read_total_pre() -> Exp {
    Exp::Read(
        Pos::none(),
        StorageRef { contract: "Counter".into(), name: "total".into(), when: When::Pre },
    )
}

fn var_x() -> Exp {
    Exp::Var(Pos::none(), AbiType::UInt(256), "x".into())
}

/// A counter with a guarded `add`, an unguarded `bump` and a `get` accessor.
fn counter() -> (Arc<dyn retrospec::SymbolicEngine>, retrospec::CompiledContract) {
    let add = uint_method("add", &["x"], &[]);
    let bump = uint_method("bump", &["x"], &[]);
    let get = uint_method("get", &[], &[AbiType::UInt(256)]);
    let methods = vec![add.clone(), bump.clone(), get.clone()];

    let creation = Bytes::from(vec![0x60, 0x80, 0x60, 0x40]);
    let runtime = dispatch_stub(&methods);

    let add_guard = Prop::Leq(sload0(), Word::Not(Box::new(Word::var("x"))));
    let new_total = Word::Add(Box::new(sload0()), Box::new(Word::var("x")));

    let engine = ScriptedEngine::new()
        .script(
            &creation,
            None,
            success(vec![], Buf::Empty, Store::write(Word::lit(0), Word::lit(0), Store::Abstract)),
        )
        .script(
            &runtime,
            Some(add.selector()),
            ExecTree::branch(
                add_guard,
                success(
                    vec![],
                    Buf::Empty,
                    Store::write(Word::lit(0), new_total.clone(), Store::Abstract),
                ),
                ExecTree::leaf(Leaf::Failure { conditions: vec![] }),
            ),
        )
        .script(
            &runtime,
            Some(bump.selector()),
            success(
                vec![],
                Buf::Empty,
                Store::write(Word::lit(0), new_total, Store::Abstract),
            ),
        )
        .script(
            &runtime,
            Some(get.selector()),
            success(vec![], Buf::single_word(sload0()), Store::Abstract),
        );

    let compiled = contract(
        "Counter",
        creation,
        runtime,
        methods,
        Some(scalar_layout(&[("total", 0)])),
    );
    (Arc::new(engine), compiled)
}

fn pool() -> Arc<SolverPool> {
    SolverPool::new(Arc::new(Z3Solver::new()), 2, Duration::from_secs(10))
}

#[tokio::test]
async fn test_counter_decompiles_and_verifies_clean() {
    let (engine, compiled) = counter();
    let spec = decompile(engine, pool(), &compiled)
        .await
        .expect("pipeline should verify clean");

    assert_eq!(spec.contract.name, "Counter");
    assert_eq!(spec.contract.behaviours.len(), 3);

    // Constructor zeroes the counter unconditionally.
    let ctor = &spec.contract.constructor;
    assert!(ctor.preconditions.is_empty());
    assert_eq!(ctor.initial_storage.len(), 1);
    assert_eq!(ctor.initial_storage[0].item.name, "total");
    assert_eq!(ctor.initial_storage[0].item.when, When::Post);
    assert_eq!(ctor.initial_storage[0].value, Exp::lit_u64(0));

    let behaviour = |name: &str| {
        spec.contract
            .behaviours
            .iter()
            .find(|b| b.name == name)
            .unwrap_or_else(|| panic!("missing behaviour `{name}`"))
    };

    // The guard on `add` is recognized as the canonical overflow check.
    let add = behaviour("add");
    let expected_guard = Exp::InRange(
        Pos::none(),
        AbiType::UInt(256),
        Box::new(Exp::Add(Pos::none(), Box::new(read_total_pre()), Box::new(var_x()))),
    );
    assert_eq!(add.preconditions, vec![expected_guard]);
    assert_eq!(add.storage_updates.len(), 1);
    assert_eq!(
        add.storage_updates[0].value,
        Exp::Mod(
            Pos::none(),
            Box::new(Exp::Add(Pos::none(), Box::new(read_total_pre()), Box::new(var_x()))),
            Box::new(Exp::LitInt(Pos::none(), word_modulus())),
        )
    );

    // Unguarded addition keeps the explicit wraparound and no precondition.
    let bump = behaviour("bump");
    assert!(bump.preconditions.is_empty());
    assert!(matches!(&bump.storage_updates[0].value, Exp::Mod(..)));

    // The accessor returns the pre-state value unchanged.
    let get = behaviour("get");
    let returns = get.returns.as_ref().expect("get returns a word");
    assert_eq!(returns.ty, AbiType::UInt(256));
    assert_eq!(returns.exp, read_total_pre());
    assert!(get.storage_updates.is_empty());
}

#[tokio::test]
async fn test_tampered_constructor_yields_counterexample() {
    let (engine, compiled) = counter();
    let pool = pool();
    let summary = retrospec::summarize(Arc::clone(&engine), Arc::clone(&pool), &compiled)
        .await
        .expect("summary");
    let mut spec = retrospec::spec::translate(&summary).expect("translate");

    // Claim the counter starts at one while the code writes zero.
    spec.contract.constructor.initial_storage[0].value = Exp::lit_u64(1);

    let report = verify(engine, pool, &spec, &compiled).await.expect("verify runs");
    assert!(!report.is_clean());
    assert!(report
        .failures
        .iter()
        .any(|f| f.location.starts_with("constructor")
            && matches!(f.kind, FailureKind::Counterexample(_))));
    let json = report.to_json().expect("report serializes");
    assert!(json.contains("Counterexample"));
}

#[tokio::test]
async fn test_unlisted_dispatch_selector_is_a_coverage_gap() {
    // A selector in the dispatch table with no corresponding ABI method.
    let (_, compiled) = counter();
    let mut compiled = compiled;
    let phantom = uint_method("burn", &["x"], &[]);
    let mut runtime = compiled.runtime.to_vec();
    runtime.truncate(runtime.len() - 1);
    runtime.push(0x63);
    runtime.extend_from_slice(&phantom.selector());
    runtime.push(0x00);
    let runtime = Bytes::from(runtime);

    // Re-script the engine for the new runtime bytes.
    let add = uint_method("add", &["x"], &[]);
    let bump = uint_method("bump", &["x"], &[]);
    let get = uint_method("get", &[], &[AbiType::UInt(256)]);
    let add_guard = Prop::Leq(sload0(), Word::Not(Box::new(Word::var("x"))));
    let new_total = Word::Add(Box::new(sload0()), Box::new(Word::var("x")));
    let engine = ScriptedEngine::new()
        .script(
            &compiled.creation,
            None,
            success(vec![], Buf::Empty, Store::write(Word::lit(0), Word::lit(0), Store::Abstract)),
        )
        .script(
            &runtime,
            Some(add.selector()),
            ExecTree::branch(
                add_guard,
                success(
                    vec![],
                    Buf::Empty,
                    Store::write(Word::lit(0), new_total.clone(), Store::Abstract),
                ),
                ExecTree::leaf(Leaf::Failure { conditions: vec![] }),
            ),
        )
        .script(
            &runtime,
            Some(bump.selector()),
            success(vec![], Buf::Empty, Store::write(Word::lit(0), new_total, Store::Abstract)),
        )
        .script(
            &runtime,
            Some(get.selector()),
            success(vec![], Buf::single_word(sload0()), Store::Abstract),
        );
    compiled.runtime = runtime;

    let err = decompile(Arc::new(engine), pool(), &compiled)
        .await
        .expect_err("phantom selector must fail verification");
    let DecompileError::Verification(report) = err else {
        panic!("expected a verification report");
    };
    assert!(report
        .failures
        .iter()
        .any(|f| f.location.starts_with("selector 0x") && f.kind == FailureKind::CoverageGap));
}
