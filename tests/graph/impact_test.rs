use std::collections::{BTreeSet, HashMap};

use sqldelta::semantic::{
    classify_change, compute_lineage, find_downstream, find_upstream, impact_radius, invert,
    AdjacencyMap, ChangeCategory, DependencyGraph, GraphError, ImpactAnalyzer, NodeChange,
};

fn adjacency(entries: &[(&str, &[&str])]) -> AdjacencyMap {
    entries
        .iter()
        .map(|(node, ids)| (node.to_string(), ids.iter().map(|id| id.to_string()).collect()))
        .collect()
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// raw_orders -> stg_orders -> {order_totals, order_statuses} -> dashboard
fn project_parents() -> AdjacencyMap {
    adjacency(&[
        ("raw_orders", &[]),
        ("stg_orders", &["raw_orders"]),
        ("order_totals", &["stg_orders"]),
        ("order_statuses", &["stg_orders"]),
        ("dashboard", &["order_totals", "order_statuses"]),
    ])
}

// =============================================================================
// Reachability
// =============================================================================

#[test]
fn test_upstream_and_downstream_are_inverse() {
    let parents = project_parents();
    let children = invert(&parents);

    for node in parents.keys() {
        let downstream = find_downstream([node.as_str()], &children);
        for other in &downstream {
            let upstream = find_upstream([other.as_str()], &parents);
            assert!(upstream.contains(node), "{node} should be upstream of {other}");
        }
    }

    assert_eq!(
        find_downstream(["stg_orders"], &children),
        set(&["order_totals", "order_statuses", "dashboard"])
    );
    assert_eq!(find_upstream(["dashboard"], &parents).len(), 4);
}

#[test]
fn test_graph_round_trips_maps() {
    let parents = project_parents();
    let graph = DependencyGraph::from_parent_map(&parents);
    assert_eq!(graph.len(), 5);
    assert_eq!(graph.edge_count(), 5);
    let inverse = invert(&parents);
    for node in graph.nodes() {
        let children: BTreeSet<&String> = graph.children(node).iter().collect();
        let expected: BTreeSet<&String> = inverse[node].iter().collect();
        assert_eq!(children, expected, "children of {node}");
    }

    let order = graph.topological_order().unwrap();
    let position = |id: &str| order.iter().position(|n| n == id).unwrap();
    assert!(position("raw_orders") < position("stg_orders"));
    assert!(position("order_statuses") < position("dashboard"));
}

#[test]
fn test_cycle_is_reported() {
    let parents = adjacency(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
    let graph = DependencyGraph::from_parent_map(&parents);
    let err = graph.validate_acyclic().unwrap_err();
    assert!(matches!(err, GraphError::CyclicDependency(ref cycles) if cycles.len() == 1));
}

// =============================================================================
// Impact
// =============================================================================

#[test]
fn test_impact_radius_for_classified_changes() {
    let parents = project_parents();
    let mut changes = HashMap::new();
    changes.insert(
        "stg_orders".to_string(),
        classify_change(
            "select id, status, amount from raw_orders",
            "select id, status, amount from raw_orders where amount > 0",
            None,
            None,
            None,
        ),
    );
    assert_eq!(changes["stg_orders"].category, ChangeCategory::Breaking);

    let impacted = impact_radius(&changes, &parents, &AdjacencyMap::new());
    assert_eq!(
        impacted,
        set(&["stg_orders", "order_totals", "order_statuses", "dashboard"])
    );
}

#[test]
fn test_non_breaking_change_without_columns_is_contained() {
    let mut changes = HashMap::new();
    changes.insert("stg_orders".to_string(), NodeChange::non_breaking());
    let impacted = impact_radius(&changes, &project_parents(), &AdjacencyMap::new());
    assert!(impacted.is_empty());
}

#[test]
fn test_column_level_impact_end_to_end() {
    let change = classify_change(
        "select id, status, amount from raw_orders",
        "select id, status, amount * 100 as amount from raw_orders",
        None,
        None,
        None,
    );
    assert_eq!(change.category, ChangeCategory::PartialBreaking);

    let analyzer = ImpactAnalyzer::new(DependencyGraph::from_parent_map(&project_parents()))
        .with_lineage(
            "order_totals",
            compute_lineage("select id, amount as total from stg_orders", None, None).unwrap(),
        )
        .with_lineage(
            "order_statuses",
            compute_lineage("select id, status from stg_orders", None, None).unwrap(),
        )
        .with_lineage(
            "dashboard",
            compute_lineage(
                "select t.id, t.total, s.status from order_totals t join order_statuses s on t.id = s.id",
                None,
                None,
            )
            .unwrap(),
        );

    let mut changes = HashMap::new();
    changes.insert("stg_orders".to_string(), change);
    let report = analyzer.analyze(&changes).unwrap();

    assert_eq!(
        report.impacted_nodes(),
        set(&["stg_orders", "order_totals", "dashboard"])
    );
    assert!(!report.is_impacted("order_statuses"));
    assert_eq!(report.get("order_totals").unwrap().columns, set(&["total"]));
    assert_eq!(report.get("dashboard").unwrap().columns, set(&["total"]));

    // Node-level impact reaches every descendant.
    let node_level = impact_radius(&changes, &project_parents(), &AdjacencyMap::new());
    assert!(node_level.contains("order_statuses"));
}
