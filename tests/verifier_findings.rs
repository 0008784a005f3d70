//! Verifier-level findings with scripted backends: every query verdict and
//! shape mismatch must surface, never pass implicitly.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bytes, U256};
use retrospec::abi::{AbiType, Interface, SlotType};
use retrospec::solver::{SmtSolver, SolverPool, Verdict};
use retrospec::spec::ast::{Behaviour, Constructor, SpecContract, Specification};
use retrospec::symbolic::expr::{Buf, Prop, Store};
use retrospec::symbolic::tree::{ExecTree, Leaf};
use retrospec::verify::FailureKind;
use retrospec::{summarize, verify};

use common::{contract, dispatch_stub, scalar_layout, uint_method, ScriptedEngine};

struct ScriptedVerdict(fn() -> Verdict);

impl SmtSolver for ScriptedVerdict {
    fn check(&self, _assertions: &[Prop], _timeout: Duration) -> Verdict {
        (self.0)()
    }
}

fn pool_with(verdict: fn() -> Verdict) -> Arc<SolverPool> {
    SolverPool::new(Arc::new(ScriptedVerdict(verdict)), 1, Duration::from_secs(1))
}

fn empty_success() -> ExecTree {
    ExecTree::leaf(Leaf::Success {
        conditions: vec![],
        returned: Buf::Empty,
        storage: Store::Abstract,
    })
}

/// A one-method contract whose runtime path does nothing observable.
fn pinger() -> (Arc<dyn retrospec::SymbolicEngine>, retrospec::CompiledContract) {
    let ping = uint_method("ping", &[], &[]);
    let creation = Bytes::from(vec![0x60]);
    let runtime = dispatch_stub(std::slice::from_ref(&ping));
    let engine = ScriptedEngine::new()
        .script(&creation, None, empty_success())
        .script(&runtime, Some(ping.selector()), empty_success());
    let compiled = contract(
        "Pinger",
        creation,
        runtime,
        vec![ping],
        Some(scalar_layout(&[("total", 0)])),
    );
    (Arc::new(engine), compiled)
}

#[tokio::test]
async fn test_return_data_the_spec_cannot_model_is_an_error() {
    let leak = uint_method("leak", &[], &[]);
    let creation = Bytes::from(vec![0x60]);
    let runtime = dispatch_stub(std::slice::from_ref(&leak));
    let engine = ScriptedEngine::new()
        .script(&creation, None, empty_success())
        .script(
            &runtime,
            Some(leak.selector()),
            ExecTree::leaf(Leaf::Success {
                conditions: vec![],
                returned: Buf::Abstract("leaked".into()),
                storage: Store::Abstract,
            }),
        );
    let compiled = contract(
        "Leaky",
        creation,
        runtime,
        vec![leak.clone()],
        Some(scalar_layout(&[("total", 0)])),
    );

    // A hand-written spec claiming the method returns nothing.
    let spec = Specification {
        store_layout: BTreeMap::from([(
            "Leaky".to_string(),
            BTreeMap::from([(
                "total".to_string(),
                (SlotType::Scalar(AbiType::UInt(256)), U256::ZERO),
            )]),
        )]),
        contract: SpecContract {
            name: "Leaky".to_string(),
            constructor: Constructor {
                interface: Interface { name: "Leaky".to_string(), decls: vec![] },
                preconditions: vec![],
                initial_storage: vec![],
            },
            behaviours: vec![Behaviour {
                name: "leak".to_string(),
                interface: leak.interface(),
                preconditions: vec![],
                returns: None,
                storage_updates: vec![],
            }],
        },
    };

    let err = verify(Arc::new(engine), pool_with(|| Verdict::Unsat), &spec, &compiled)
        .await
        .expect_err("a return buffer the spec cannot model must not verify clean");
    assert!(err.to_string().contains("unable to convert return buffer"), "got: {err}");
}

#[tokio::test]
async fn test_unknown_verdict_is_reported_as_timeout() {
    let (engine, compiled) = pinger();
    let pool = pool_with(|| Verdict::Unknown);
    let summary = summarize(Arc::clone(&engine), Arc::clone(&pool), &compiled)
        .await
        .expect("summary");
    let spec = retrospec::spec::translate(&summary).expect("translate");

    let report = verify(engine, pool, &spec, &compiled).await.expect("verify runs");
    assert!(!report.is_clean(), "unknown verdicts must never pass implicitly");
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::Timeout));
}

#[tokio::test]
async fn test_phantom_behaviour_is_a_coverage_gap() {
    let (engine, compiled) = pinger();
    let pool = pool_with(|| Verdict::Unsat);
    let summary = summarize(Arc::clone(&engine), Arc::clone(&pool), &compiled)
        .await
        .expect("summary");
    let mut spec = retrospec::spec::translate(&summary).expect("translate");

    // A behaviour for a method the bytecode's ABI does not have.
    spec.contract.behaviours.push(Behaviour {
        name: "ghost".to_string(),
        interface: Interface { name: "ghost".to_string(), decls: vec![] },
        preconditions: vec![],
        returns: None,
        storage_updates: vec![],
    });

    let report = verify(engine, pool, &spec, &compiled).await.expect("verify runs");
    assert!(report
        .failures
        .iter()
        .any(|f| f.location.contains("ghost") && f.kind == FailureKind::CoverageGap));
}
