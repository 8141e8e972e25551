use std::collections::{BTreeMap, BTreeSet};

use crate::identifier::Identifier;

/// Table -> tables it depends on (its referenced parents).
pub type DependencyGraph = BTreeMap<Identifier, BTreeSet<Identifier>>;

/// Deterministic topological order, parents before children.
///
/// Returns the members left with unresolved dependencies when the graph has a
/// cycle. No partial order is returned in that case.
pub fn topo_order(dependencies: &DependencyGraph) -> Result<Vec<Identifier>, Vec<Identifier>> {
    let mut children: BTreeMap<Identifier, BTreeSet<Identifier>> = BTreeMap::new();
    let mut indegree: BTreeMap<Identifier, usize> = BTreeMap::new();

    for (node, parents) in dependencies {
        indegree.entry(node.clone()).or_insert(0);
        for parent in parents {
            indegree.entry(parent.clone()).or_insert(0);
            if children
                .entry(parent.clone())
                .or_default()
                .insert(node.clone())
            {
                *indegree.entry(node.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut ready: BTreeSet<Identifier> = indegree
        .iter()
        .filter_map(|(node, count)| (*count == 0).then(|| node.clone()))
        .collect();

    let mut order = Vec::with_capacity(indegree.len());

    while let Some(node) = ready.pop_first() {
        if let Some(targets) = children.get(&node) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(target.clone());
                    }
                }
            }
        }
        order.push(node);
    }

    if order.len() == indegree.len() {
        Ok(order)
    } else {
        let placed: BTreeSet<&Identifier> = order.iter().collect();
        Err(indegree
            .keys()
            .filter(|node| !placed.contains(node))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identifier {
        Identifier::new("public", name)
    }

    #[test]
    fn toposort_orders_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.entry(id("orders")).or_default().insert(id("users"));
        graph.entry(id("items")).or_default().insert(id("orders"));
        graph.entry(id("users")).or_default();

        let order = topo_order(&graph).expect("expected toposort");
        let position = |name: &str| order.iter().position(|item| *item == id(name)).unwrap();
        assert!(position("users") < position("orders"));
        assert!(position("orders") < position("items"));
    }

    #[test]
    fn toposort_includes_parents_without_entries() {
        let mut graph = DependencyGraph::new();
        graph.entry(id("child")).or_default().insert(id("base"));

        let order = topo_order(&graph).expect("expected toposort");
        assert_eq!(order, vec![id("base"), id("child")]);
    }

    #[test]
    fn toposort_reports_cycle() {
        let mut graph = DependencyGraph::new();
        graph.entry(id("a")).or_default().insert(id("b"));
        graph.entry(id("b")).or_default().insert(id("a"));
        graph.entry(id("free")).or_default();

        let cycle = topo_order(&graph).expect_err("expected cycle");
        assert_eq!(cycle, vec![id("a"), id("b")]);
    }
}
