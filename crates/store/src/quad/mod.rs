//! The quad table: six permutation indexes over one set of quads.
//!
//! | Index | Key order | Serves patterns binding        |
//! |-------|-----------|--------------------------------|
//! | GSPO  | g s p o   | g, gs, gsp, gspo               |
//! | GPOS  | g p o s   | gp, gpo                        |
//! | GOSP  | g o s p   | go, gos                        |
//! | SPOG  | s p o g   | s, sp, spo                     |
//! | POSG  | p o s g   | p, po, pos                     |
//! | OSPG  | o s p g   | o, os, osp                     |
//!
//! Every pattern has an index whose key begins with all of its bound
//! positions, so lookups are prefix scans and never full scans unless
//! nothing is bound.

mod index;
mod iter;
mod table;

pub use index::{IndexKind, KEY_WIDTH};
pub use iter::{GraphIter, QuadIter, TripleIter};
pub use table::{QuadTable, TableRoots};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use graphvault_types::{Quad, QuadPattern, TermId, Triple};

    use super::*;
    use crate::{btree::test_support::MemProvider, error::Error};

    fn q(g: u64, s: u64, p: u64, o: u64) -> Quad {
        Quad::new(g, s, p, o)
    }

    fn table_with(quads: &[Quad]) -> (MemProvider, TableRoots) {
        let mut provider = MemProvider::new(512);
        let roots = {
            let mut table = QuadTable::new(&mut provider, TableRoots::default());
            for quad in quads {
                table.add(quad).unwrap();
            }
            table.roots()
        };
        provider.publish();
        (provider, roots)
    }

    fn find(provider: &MemProvider, roots: TableRoots, pattern: QuadPattern) -> BTreeSet<Quad> {
        QuadTable::new(provider, roots).find(&pattern).map(|q| q.unwrap()).collect()
    }

    fn sample() -> Vec<Quad> {
        vec![
            q(0, 1, 2, 3),
            q(0, 1, 2, 4),
            q(5, 1, 2, 3),
            q(5, 6, 2, 3),
            q(7, 1, 8, 9),
            q(7, 1, 2, 3),
        ]
    }

    #[test]
    fn test_add_is_idempotent_and_counted() {
        let mut provider = MemProvider::new(512);
        let mut table = QuadTable::new(&mut provider, TableRoots::default());
        assert!(table.add(&q(1, 2, 3, 4)).unwrap());
        assert!(!table.add(&q(1, 2, 3, 4)).unwrap());
        assert_eq!(table.len(), 1);
        assert!(table.delete(&q(1, 2, 3, 4)).unwrap());
        assert!(!table.delete(&q(1, 2, 3, 4)).unwrap());
        assert!(table.is_empty());
        assert_eq!(table.roots(), TableRoots::default());
    }

    #[test]
    fn test_union_graph_quad_is_rejected() {
        let mut provider = MemProvider::new(512);
        let mut table = QuadTable::new(&mut provider, TableRoots::default());
        let quad = Quad::new(TermId::UNION_GRAPH, 1u64, 2u64, 3u64);
        assert!(matches!(table.add(&quad), Err(Error::InvalidQuad { .. })));
        assert!(!table.delete(&quad).unwrap());
        assert!(table.is_empty());
    }

    #[test]
    fn test_every_pattern_shape_matches_filter() {
        let quads = sample();
        let (provider, roots) = table_with(&quads);
        let values = |i: usize| [Some(TermId::new(i as u64)), None];
        for g in [Some(TermId::new(0)), Some(TermId::new(5)), Some(TermId::UNION_GRAPH), None] {
            for s in values(1) {
                for p in values(2) {
                    for o in values(3) {
                        let pattern = QuadPattern::new(g, s, p, o);
                        let expected: BTreeSet<Quad> =
                            quads.iter().copied().filter(|quad| pattern.matches(quad)).collect();
                        assert_eq!(find(&provider, roots, pattern), expected, "{pattern:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_union_graph_excludes_default_graph() {
        let (provider, roots) = table_with(&sample());
        let found = find(&provider, roots, QuadPattern::union_graph());
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|quad| !quad.is_default_graph()));
    }

    #[test]
    fn test_find_union_triples_is_distinct() {
        let (provider, roots) = table_with(&sample());
        let table = QuadTable::new(&provider, roots);
        let triples: Vec<Triple> = table
            .find_union_triples(&QuadPattern::any().with_predicate(2u64))
            .map(|t| t.unwrap())
            .collect();
        // (1 2 3) lives in graphs 0, 5 and 7 but appears once; graph 0 alone
        // holds (1 2 4), so it is absent.
        assert_eq!(triples, vec![Triple::new(1u64, 2u64, 3u64), Triple::new(6u64, 2u64, 3u64)]);
    }

    #[test]
    fn test_list_graph_nodes() {
        let (provider, roots) = table_with(&sample());
        let table = QuadTable::new(&provider, roots);
        let graphs: Vec<u64> = table.list_graph_nodes().map(|g| g.unwrap().value()).collect();
        assert_eq!(graphs, vec![5, 7]);
    }

    #[test]
    fn test_list_graph_nodes_has_no_phantoms() {
        let (mut provider, roots) = table_with(&sample());
        let roots = {
            let mut table = QuadTable::new(&mut provider, roots);
            assert_eq!(table.delete_matching(&QuadPattern::any().with_graph(5u64)).unwrap(), 2);
            table.roots()
        };
        let table = QuadTable::new(&provider, roots);
        let graphs: Vec<u64> = table.list_graph_nodes().map(|g| g.unwrap().value()).collect();
        assert_eq!(graphs, vec![7]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_list_graph_nodes_on_empty_and_default_only() {
        let (provider, roots) = table_with(&[]);
        assert_eq!(QuadTable::new(&provider, roots).list_graph_nodes().count(), 0);

        let (provider, roots) = table_with(&[q(0, 1, 1, 1)]);
        assert_eq!(QuadTable::new(&provider, roots).list_graph_nodes().count(), 0);
    }

    #[test]
    fn test_indexes_stay_consistent_under_churn() {
        let mut provider = MemProvider::new(512);
        let mut roots = TableRoots::default();
        for round in 0..4u64 {
            let mut table = QuadTable::new(&mut provider, roots);
            for n in 0..150u64 {
                table.add(&q(n % 5, n, round, n * 7)).unwrap();
            }
            for n in (0..150u64).step_by(3) {
                table.delete(&q(n % 5, n, round, n * 7)).unwrap();
            }
            roots = table.roots();
            provider.publish();
        }
        let table = QuadTable::new(&provider, roots);
        table.verify().unwrap();
        assert_eq!(table.len(), 4 * 100);
    }

    #[test]
    fn test_clear_retires_all_blocks() {
        let (mut provider, roots) = table_with(&sample());
        let roots = {
            let mut table = QuadTable::new(&mut provider, roots);
            table.clear().unwrap();
            table.roots()
        };
        assert_eq!(roots, TableRoots::default());
        assert!(!provider.retired.is_empty());
    }
}
