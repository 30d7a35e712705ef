//! Term, quad and pattern definitions.
//!
//! Terms are opaque to the store: an external dictionary maps RDF nodes to
//! [`TermId`] values and back. The store only compares them as fixed-width
//! big-endian byte strings, which orders them numerically.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Term identifiers
// ============================================================================

/// Opaque identifier for an RDF term (IRI, literal or blank node).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TermId(u64);

impl TermId {
    /// Width of an encoded term in bytes.
    pub const WIDTH: usize = 8;

    /// Marker for the default graph. Triples live in this graph.
    pub const DEFAULT_GRAPH: TermId = TermId(0);

    /// Marker for the union of all named graphs.
    ///
    /// Only meaningful in the graph position of a [`QuadPattern`]; quads
    /// cannot be stored under it.
    pub const UNION_GRAPH: TermId = TermId(u64::MAX);

    /// Creates a new identifier from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw numeric value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns true for the default-graph marker.
    #[inline]
    pub const fn is_default_graph(self) -> bool {
        self.0 == Self::DEFAULT_GRAPH.0
    }

    /// Returns true for the union-graph marker.
    #[inline]
    pub const fn is_union_graph(self) -> bool {
        self.0 == Self::UNION_GRAPH.0
    }

    /// Big-endian encoding, so byte order equals numeric order.
    #[inline]
    pub const fn to_be_bytes(self) -> [u8; Self::WIDTH] {
        self.0.to_be_bytes()
    }

    /// Decodes a big-endian encoded term.
    #[inline]
    pub const fn from_be_bytes(bytes: [u8; Self::WIDTH]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for TermId {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TermId> for u64 {
    #[inline]
    fn from(id: TermId) -> Self {
        id.0
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_graph() {
            write!(f, "default")
        } else if self.is_union_graph() {
            write!(f, "union")
        } else {
            write!(f, "t:{}", self.0)
        }
    }
}

// ============================================================================
// Quads and triples
// ============================================================================

/// A fact in a named graph (or the default graph).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Quad {
    /// Graph the fact belongs to.
    pub graph: TermId,
    /// Subject term.
    pub subject: TermId,
    /// Predicate term.
    pub predicate: TermId,
    /// Object term.
    pub object: TermId,
}

impl Quad {
    /// Creates a quad.
    pub fn new(
        graph: impl Into<TermId>,
        subject: impl Into<TermId>,
        predicate: impl Into<TermId>,
        object: impl Into<TermId>,
    ) -> Self {
        Self {
            graph: graph.into(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Returns the four terms in G, S, P, O order.
    #[inline]
    pub fn terms(&self) -> [TermId; 4] {
        [self.graph, self.subject, self.predicate, self.object]
    }

    /// Builds a quad from terms in G, S, P, O order.
    #[inline]
    pub fn from_terms(terms: [TermId; 4]) -> Self {
        Self { graph: terms[0], subject: terms[1], predicate: terms[2], object: terms[3] }
    }

    /// Returns the subject, predicate and object as a triple.
    #[inline]
    pub fn triple(&self) -> Triple {
        Triple { subject: self.subject, predicate: self.predicate, object: self.object }
    }

    /// Returns true if this quad lives in the default graph.
    #[inline]
    pub fn is_default_graph(&self) -> bool {
        self.graph.is_default_graph()
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {} {})", self.graph, self.subject, self.predicate, self.object)
    }
}

/// A subject-predicate-object fact without a graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Triple {
    /// Subject term.
    pub subject: TermId,
    /// Predicate term.
    pub predicate: TermId,
    /// Object term.
    pub object: TermId,
}

impl Triple {
    /// Creates a triple.
    pub fn new(
        subject: impl Into<TermId>,
        predicate: impl Into<TermId>,
        object: impl Into<TermId>,
    ) -> Self {
        Self { subject: subject.into(), predicate: predicate.into(), object: object.into() }
    }

    /// The quad that stores this triple in the default graph.
    #[inline]
    pub fn in_default_graph(self) -> Quad {
        self.in_graph(TermId::DEFAULT_GRAPH)
    }

    /// The quad that stores this triple in `graph`.
    #[inline]
    pub fn in_graph(self, graph: TermId) -> Quad {
        Quad { graph, subject: self.subject, predicate: self.predicate, object: self.object }
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// A quad lookup pattern. `None` in a position is a wildcard.
///
/// The graph position has three special readings:
/// - `None` matches every quad, the default graph included
/// - `Some(TermId::DEFAULT_GRAPH)` matches the default graph only
/// - `Some(TermId::UNION_GRAPH)` matches every named graph, never the default graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadPattern {
    /// Graph constraint.
    pub graph: Option<TermId>,
    /// Subject constraint.
    pub subject: Option<TermId>,
    /// Predicate constraint.
    pub predicate: Option<TermId>,
    /// Object constraint.
    pub object: Option<TermId>,
}

impl QuadPattern {
    /// A pattern matching everything.
    pub const fn any() -> Self {
        Self { graph: None, subject: None, predicate: None, object: None }
    }

    /// Creates a pattern from explicit positions.
    pub fn new(
        graph: Option<TermId>,
        subject: Option<TermId>,
        predicate: Option<TermId>,
        object: Option<TermId>,
    ) -> Self {
        Self { graph, subject, predicate, object }
    }

    /// A fully bound pattern for one quad.
    pub fn exact(quad: &Quad) -> Self {
        Self {
            graph: Some(quad.graph),
            subject: Some(quad.subject),
            predicate: Some(quad.predicate),
            object: Some(quad.object),
        }
    }

    /// A pattern over the union of all named graphs.
    pub fn union_graph() -> Self {
        Self::any().with_graph(TermId::UNION_GRAPH)
    }

    /// Constrains the graph.
    #[must_use]
    pub fn with_graph(mut self, graph: impl Into<TermId>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    /// Constrains the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<TermId>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Constrains the predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: impl Into<TermId>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Constrains the object.
    #[must_use]
    pub fn with_object(mut self, object: impl Into<TermId>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Returns true if the graph position selects the union graph.
    #[inline]
    pub fn is_union_graph(&self) -> bool {
        self.graph.is_some_and(TermId::is_union_graph)
    }

    /// Positions in G, S, P, O order. The union marker is reported as unbound.
    pub fn bound_terms(&self) -> [Option<TermId>; 4] {
        let graph = self.graph.filter(|g| !g.is_union_graph());
        [graph, self.subject, self.predicate, self.object]
    }

    /// Returns true if `quad` satisfies this pattern.
    pub fn matches(&self, quad: &Quad) -> bool {
        let graph_ok = match self.graph {
            None => true,
            Some(g) if g.is_union_graph() => !quad.graph.is_default_graph(),
            Some(g) => quad.graph == g,
        };
        graph_ok
            && self.subject.is_none_or(|s| s == quad.subject)
            && self.predicate.is_none_or(|p| p == quad.predicate)
            && self.object.is_none_or(|o| o == quad.object)
    }
}
