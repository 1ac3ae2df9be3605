#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::{BTreeSet, HashSet, VecDeque};

use proptest::prelude::*;
use strata_core::model::Entity;
use strata_core::{compute_changes, EntityGraph, NodeId, OperationKind};

/// One generated node: optional stored id, optional `link` target and the
/// indices placed in `items`
#[derive(Debug, Clone)]
struct NodeSpec {
    saved: bool,
    link: Option<usize>,
    items: Vec<usize>,
}

fn graph_spec() -> impl Strategy<Value = Vec<NodeSpec>> {
    (1usize..12).prop_flat_map(|n| {
        prop::collection::vec(
            (
                any::<bool>(),
                prop::option::of(0..n),
                prop::collection::vec(0..n, 0..3),
            )
                .prop_map(|(saved, link, items)| NodeSpec { saved, link, items }),
            n,
        )
    })
}

fn build(specs: &[NodeSpec]) -> (EntityGraph, Vec<NodeId>) {
    let mut graph = EntityGraph::new();
    let ids: Vec<NodeId> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let mut entity = Entity::new("Node").with("label", format!("n{}", i));
            if spec.saved {
                entity.set("id", (i + 1) as i64);
            }
            graph.add(entity)
        })
        .collect();
    for (i, spec) in specs.iter().enumerate() {
        if let Some(target) = spec.link {
            graph.relate(ids[i], "link", ids[target]);
        }
        for &item in &spec.items {
            graph.add_to(ids[i], "items", ids[item]);
        }
    }
    (graph, ids)
}

/// Nodes reachable from `root` through `link` and `items`
fn reachable(specs: &[NodeSpec], root: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(i) = queue.pop_front() {
        let next = specs[i].link.iter().chain(specs[i].items.iter());
        for &j in next {
            if seen.insert(j) {
                queue.push_back(j);
            }
        }
    }
    seen
}

proptest! {
    #[test]
    fn prop_save_emits_one_operation_per_reachable_node(specs in graph_spec()) {
        // GIVEN: a random, possibly cyclic graph with unique identities
        let registry = common::node_registry();
        let (mut graph, ids) = build(&specs);

        // WHEN: saving from the first node
        let set = compute_changes(&registry, &mut graph, &[ids[0]], OperationKind::Save).unwrap();

        // THEN: every reachable node gets exactly one operation
        let nodes: Vec<NodeId> = set.iter().map(|op| op.node()).collect();
        let distinct: HashSet<NodeId> = nodes.iter().copied().collect();
        prop_assert_eq!(distinct.len(), nodes.len());
        let expected: BTreeSet<NodeId> = reachable(&specs, 0).into_iter().map(|i| ids[i]).collect();
        prop_assert_eq!(distinct.into_iter().collect::<BTreeSet<_>>(), expected);
    }

    #[test]
    fn prop_shared_identities_are_written_once(specs in graph_spec(), shared in 1i64..4) {
        // GIVEN: a graph where every saved node carries one of a few ids
        let registry = common::node_registry();
        let (mut graph, ids) = build(&specs);
        for (i, spec) in specs.iter().enumerate() {
            if spec.saved {
                graph.entity_mut(ids[i]).set("id", (i as i64) % shared);
            }
        }

        // WHEN: saving from every node at once
        let set = compute_changes(&registry, &mut graph, &ids, OperationKind::Save).unwrap();

        // THEN: no identity is written twice
        let identities: Vec<_> = set.iter().filter_map(|op| op.identity().cloned()).collect();
        let distinct: HashSet<_> = identities.iter().cloned().collect();
        prop_assert_eq!(distinct.len(), identities.len());
    }

    #[test]
    fn prop_remove_terminates_on_cycles(specs in graph_spec()) {
        // GIVEN: a random graph whose root is stored
        let registry = common::node_registry();
        let (mut graph, ids) = build(&specs);
        graph.entity_mut(ids[0]).set("id", 1000i64);

        // WHEN: removing from the root
        let set = compute_changes(&registry, &mut graph, &[ids[0]], OperationKind::Remove).unwrap();

        // THEN: only stored nodes are deleted, each once
        prop_assert!(set.iter().all(|op| op.name() == "delete"));
        let nodes: HashSet<NodeId> = set.iter().map(|op| op.node()).collect();
        prop_assert_eq!(nodes.len(), set.len());
        prop_assert!(nodes.contains(&ids[0]));
    }
}
