//! Proptest strategies for graphvault domain types.
//!
//! Reusable generators for property-based testing across crates. Term IDs
//! are drawn from small ranges so generated quads collide often, which is
//! what exercises duplicate handling, shared prefixes and graph emptying.
//!
//! # Usage
//!
//! ```no_run
//! use graphvault_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(ops in strategies::arb_quad_ops(50)) {
//!         // apply ops to a store and to a model, compare
//!     }
//! }
//! ```

use graphvault_types::{Quad, QuadPattern, TermId};
use proptest::prelude::*;

/// Generates a named-graph ID in 1..=4.
pub fn arb_named_graph() -> impl Strategy<Value = TermId> {
    (1u64..=4).prop_map(TermId::new)
}

/// Generates a graph ID: the default graph or a named graph, never the
/// union-graph marker.
pub fn arb_graph() -> impl Strategy<Value = TermId> {
    prop_oneof![
        1 => Just(TermId::DEFAULT_GRAPH),
        4 => arb_named_graph(),
    ]
}

/// Generates a subject, predicate or object ID in 1..=8, with an occasional
/// large value to cover full-width encoding.
pub fn arb_term() -> impl Strategy<Value = TermId> {
    prop_oneof![
        8 => (1u64..=8).prop_map(TermId::new),
        1 => (u64::MAX / 2..u64::MAX - 1).prop_map(TermId::new),
    ]
}

/// Generates a storable quad.
pub fn arb_quad() -> impl Strategy<Value = Quad> {
    (arb_graph(), arb_term(), arb_term(), arb_term()).prop_map(|(g, s, p, o)| Quad::new(g, s, p, o))
}

/// Generates a pattern covering all sixteen bound/unbound shapes, with the
/// graph position sometimes set to the union graph.
pub fn arb_quad_pattern() -> impl Strategy<Value = QuadPattern> {
    let graph = prop_oneof![
        2 => Just(None),
        1 => Just(Some(TermId::UNION_GRAPH)),
        3 => arb_graph().prop_map(Some),
    ];
    (
        graph,
        proptest::option::of(arb_term()),
        proptest::option::of(arb_term()),
        proptest::option::of(arb_term()),
    )
        .prop_map(|(g, s, p, o)| QuadPattern::new(g, s, p, o))
}

/// A change applied to both a store and a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuadOp {
    /// Add a quad.
    Add(Quad),
    /// Delete a quad.
    Delete(Quad),
    /// Delete everything matching a pattern.
    DeleteMatching(QuadPattern),
}

/// Generates one change, weighted towards adds so stores grow.
pub fn arb_quad_op() -> impl Strategy<Value = QuadOp> {
    prop_oneof![
        6 => arb_quad().prop_map(QuadOp::Add),
        3 => arb_quad().prop_map(QuadOp::Delete),
        1 => arb_quad_pattern().prop_map(QuadOp::DeleteMatching),
    ]
}

/// Generates 1 to `max` changes.
pub fn arb_quad_ops(max: usize) -> impl Strategy<Value = Vec<QuadOp>> {
    proptest::collection::vec(arb_quad_op(), 1..=max.max(1))
}

/// Generates change sequences split into 1-5 transactions, each flagged
/// commit (`true`) or abort (`false`).
pub fn arb_transactions(max_ops: usize) -> impl Strategy<Value = Vec<(Vec<QuadOp>, bool)>> {
    proptest::collection::vec((arb_quad_ops(max_ops), prop::bool::weighted(0.8)), 1..=5)
}
