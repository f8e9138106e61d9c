use std::collections::{BTreeSet, HashMap};

use crate::catalog::ViewCatalog;
use crate::config::MAX_DEPENDENCY_DEPTH;
use crate::error::{ViewError, ViewResult};
use crate::view::ViewDefinition;

/// Which declared views read from which, restricted to one module
///
/// `edges[i]` holds the indices of the views that view `i` reads from.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph from the live catalog
    ///
    /// Views that do not exist yet contribute no edges. References to views
    /// outside `views` are ignored.
    pub fn from_catalog<C: ViewCatalog + ?Sized>(
        views: &[ViewDefinition],
        catalog: &C,
    ) -> ViewResult<Self> {
        let index: HashMap<&str, usize> = views
            .iter()
            .enumerate()
            .map(|(i, v)| (v.qualified_name().relname, i))
            .collect();

        let mut edges = vec![Vec::new(); views.len()];
        for (i, view) in views.iter().enumerate() {
            if !catalog.view_exists(view)? {
                continue;
            }
            for referenced in catalog.referenced_views(view)? {
                if let Some(&j) = index.get(referenced.as_str()) {
                    if j != i && !edges[i].contains(&j) {
                        edges[i].push(j);
                    }
                }
            }
        }

        Ok(Self { edges })
    }

    /// Indices ordered so that every view comes before the views it reads
    /// from; ties keep declaration order
    ///
    /// ALGORITHM: Kahn's topological sort over "dependent -> dependency"
    /// edges, always taking the lowest ready index. Chain length is tracked
    /// to enforce `MAX_DEPENDENCY_DEPTH`.
    pub fn dependents_first(&self, names: &[String]) -> ViewResult<Vec<usize>> {
        let n = self.edges.len();
        let mut in_degree = vec![0usize; n];
        for targets in &self.edges {
            for &j in targets {
                in_degree[j] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut depth = vec![0usize; n];
        let mut order = Vec::with_capacity(n);

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &j in &self.edges[i] {
                depth[j] = depth[j].max(depth[i] + 1);
                if depth[j] > MAX_DEPENDENCY_DEPTH {
                    return Err(ViewError::DependencyDepthExceeded {
                        depth: depth[j],
                        max_depth: MAX_DEPENDENCY_DEPTH,
                    });
                }
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.insert(j);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
            let cycle = self
                .find_cycle(&stuck)
                .into_iter()
                .map(|i| names.get(i).cloned().unwrap_or_else(|| i.to_string()))
                .collect();
            return Err(ViewError::CircularDependency { cycle });
        }

        Ok(order)
    }

    /// One cycle among the nodes Kahn's sort could not place, closed (first
    /// node repeated at the end) and starting from its lowest index
    ///
    /// Every stuck node still has a stuck dependent, so walking dependents
    /// from any stuck node must revisit one. Nodes that are only downstream
    /// of the cycle are never on that walk's loop.
    fn find_cycle(&self, stuck: &[bool]) -> Vec<usize> {
        let Some(start) = stuck.iter().position(|&s| s) else {
            return Vec::new();
        };

        let mut seen_at: Vec<Option<usize>> = vec![None; stuck.len()];
        let mut walk = Vec::new();
        let mut node = start;
        while seen_at[node].is_none() {
            seen_at[node] = Some(walk.len());
            walk.push(node);
            node = (0..stuck.len())
                .find(|&p| stuck[p] && self.edges[p].contains(&node))
                .unwrap_or(node);
        }

        // The walk follows dependents; reverse it to read "reads from"
        let mut cycle = walk.split_off(seen_at[node].unwrap_or(0));
        cycle.reverse();
        if let Some(lowest) = (0..cycle.len()).min_by_key(|&k| cycle[k]) {
            cycle.rotate_left(lowest);
        }
        if let Some(&first) = cycle.first() {
            cycle.push(first);
        }
        cycle
    }
}

/// Order a module's views so that dropping them one by one without CASCADE
/// never hits a dependent declared in the same module
pub fn drop_order<'a, C: ViewCatalog + ?Sized>(
    views: &'a [ViewDefinition],
    catalog: &C,
) -> ViewResult<Vec<&'a ViewDefinition>> {
    let graph = DependencyGraph::from_catalog(views, catalog)?;
    let names: Vec<String> = views.iter().map(|v| v.table_name.clone()).collect();

    Ok(graph
        .dependents_first(&names)?
        .into_iter()
        .map(|i| &views[i])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::ddl::{DropStatus, DropViews};

    fn view(name: &str, table: &str, materialized: bool) -> ViewDefinition {
        ViewDefinition::new("viewtest", name, table, "SELECT 1 AS one", materialized)
    }

    fn names(order: &[&ViewDefinition]) -> Vec<String> {
        order.iter().map(|v| v.name.clone()).collect()
    }

    #[test]
    fn test_dependent_moves_before_dependency() {
        let views = vec![
            view("A", "viewtest_a", false),
            view("B", "viewtest_b", false),
            view("C", "viewtest_c", true),
        ];
        let catalog = MemoryCatalog::new()
            .with_view("viewtest_a", &[])
            .with_view("viewtest_b", &["viewtest_a"])
            .with_materialized_view("viewtest_c", &[]);

        let order = drop_order(&views, &catalog).unwrap();
        assert_eq!(names(&order), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_ordered_pass_drops_everything_without_force() {
        let views = vec![
            view("A", "viewtest_a", false),
            view("B", "viewtest_b", false),
            view("C", "viewtest_c", true),
        ];
        let catalog = MemoryCatalog::new()
            .with_view("viewtest_a", &[])
            .with_view("viewtest_b", &["viewtest_a"])
            .with_materialized_view("viewtest_c", &["viewtest_b"]);

        let ordered: Vec<ViewDefinition> = drop_order(&views, &catalog)
            .unwrap()
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(ordered[0].name, "C");

        let statuses: Vec<DropStatus> = DropViews::new(&ordered, &catalog, false)
            .map(|r| r.unwrap().status)
            .collect();
        assert_eq!(statuses, vec![DropStatus::Dropped; 3]);
    }

    #[test]
    fn test_missing_views_keep_declaration_order() {
        let views = vec![view("A", "viewtest_a", false), view("B", "viewtest_b", false)];
        let order = drop_order(&views, &MemoryCatalog::new()).unwrap();
        assert_eq!(names(&order), vec!["A", "B"]);
    }

    #[test]
    fn test_outside_dependencies_ignored() {
        let views = vec![view("A", "viewtest_a", false)];
        let catalog = MemoryCatalog::new()
            .with_view("other_base", &[])
            .with_view("viewtest_a", &["other_base"]);

        assert_eq!(names(&drop_order(&views, &catalog).unwrap()), vec!["A"]);
    }

    #[test]
    fn test_cycle_reported() {
        let graph = DependencyGraph { edges: vec![vec![1], vec![0], vec![]] };
        let names = vec!["v_a".to_string(), "v_b".to_string(), "v_c".to_string()];

        match graph.dependents_first(&names) {
            Err(ViewError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["v_a", "v_b", "v_a"]);
            }
            other => panic!("Expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_excludes_downstream_views() {
        // a -> b -> c -> b, d -> a; c also reads e
        let graph = DependencyGraph {
            edges: vec![vec![1], vec![2], vec![1, 4], vec![0], vec![]],
        };
        let names: Vec<String> = ["v_a", "v_b", "v_c", "v_d", "v_e"].iter().map(|s| s.to_string()).collect();

        match graph.dependents_first(&names) {
            Err(ViewError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["v_b", "v_c", "v_b"]);
            }
            other => panic!("Expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_limit_enforced() {
        let n = MAX_DEPENDENCY_DEPTH + 2;
        let edges = (0..n).map(|i| if i + 1 < n { vec![i + 1] } else { vec![] }).collect();
        let graph = DependencyGraph { edges };
        let names: Vec<String> = (0..n).map(|i| format!("v_{i}")).collect();

        let err = graph.dependents_first(&names).unwrap_err();
        assert_eq!(err.sqlstate(), "54001");
    }
}
