//! In-memory directed dependency graph derived from `imports` relations (§4.6).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::model::RelationType;
use crate::repositories::RelationRepository;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

pub struct DependencyGraph {
    forward: HashMap<String, HashSet<String>>,
    reverse: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    /// Load all `imports` relations for `project` and materialize both
    /// adjacency directions.
    pub fn build(store: &Store, project: &str) -> Result<Self> {
        let repo = RelationRepository::new(store);
        let relations = repo.get_by_type(project, RelationType::Imports)?;

        let mut forward: HashMap<String, HashSet<String>> = HashMap::new();
        let mut reverse: HashMap<String, HashSet<String>> = HashMap::new();

        for rel in relations {
            forward
                .entry(rel.src_file_path.clone())
                .or_default()
                .insert(rel.dst_file_path.clone());
            reverse
                .entry(rel.dst_file_path.clone())
                .or_default()
                .insert(rel.src_file_path.clone());
        }

        Ok(Self { forward, reverse })
    }

    /// BFS over reverse edges, excluding `path` itself.
    pub fn get_transitive_dependents(&self, path: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(direct) = self.reverse.get(path) {
            for dep in direct {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }

        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            result.push(current.clone());
            if let Some(direct) = self.reverse.get(&current) {
                for dep in direct {
                    if dep != path && visited.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }
        result
    }

    /// DFS with a three-colour marker; a back-edge to a gray node proves a cycle.
    pub fn has_cycle(&self) -> bool {
        let mut colors: HashMap<&str, Color> = HashMap::new();
        for node in self.forward.keys() {
            colors.entry(node.as_str()).or_insert(Color::White);
        }
        for edges in self.reverse.keys() {
            colors.entry(edges.as_str()).or_insert(Color::White);
        }

        let nodes: Vec<String> = colors.keys().map(|s| s.to_string()).collect();
        for node in &nodes {
            if colors.get(node.as_str()) == Some(&Color::White) {
                if self.dfs_has_cycle(node, &mut colors) {
                    return true;
                }
            }
        }
        false
    }

    fn dfs_has_cycle<'a>(&'a self, node: &'a str, colors: &mut HashMap<&'a str, Color>) -> bool {
        colors.insert(node, Color::Gray);
        if let Some(neighbors) = self.forward.get(node) {
            for next in neighbors {
                match colors.get(next.as_str()).copied() {
                    Some(Color::Gray) => return true,
                    Some(Color::White) | None => {
                        if self.dfs_has_cycle(next, colors) {
                            return true;
                        }
                    }
                    Some(Color::Black) => {}
                }
            }
        }
        colors.insert(node, Color::Black);
        false
    }

    /// Union of transitive dependents for all `paths`, deduplicated.
    pub fn get_affected_by_change(&self, paths: &[String]) -> Vec<String> {
        let mut affected = HashSet::new();
        for path in paths {
            for dep in self.get_transitive_dependents(path) {
                affected.insert(dep);
            }
        }
        affected.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CodeRelation;
    use crate::model::FileRecord;
    use crate::repositories::FileRepository;
    use tempfile::tempdir;

    fn with_files(store: &Store, paths: &[&str]) {
        let files = FileRepository::new(store);
        for p in paths {
            files
                .upsert_file(&FileRecord {
                    project: "p".into(),
                    file_path: p.to_string(),
                    mtime_ms: 1,
                    size: 1,
                    content_hash: "h".into(),
                    updated_at: 1,
                })
                .unwrap();
        }
    }

    fn import(dst: &str) -> CodeRelation {
        CodeRelation {
            relation_type: RelationType::Imports,
            src_symbol_name: None,
            dst_file_path: dst.to_string(),
            dst_symbol_name: None,
            meta: serde_json::json!({}),
        }
    }

    #[test]
    fn transitive_dependents_follow_chain() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        with_files(&store, &["a.ts", "b.ts", "c.ts"]);
        let relations = RelationRepository::new(&store);
        // a imports b, b imports c => c's dependents are {b, a}
        relations.replace_file_relations("p", "a.ts", &[import("b.ts")]).unwrap();
        relations.replace_file_relations("p", "b.ts", &[import("c.ts")]).unwrap();

        let graph = DependencyGraph::build(&store, "p").unwrap();
        let mut dependents = graph.get_transitive_dependents("c.ts");
        dependents.sort();
        assert_eq!(dependents, vec!["a.ts".to_string(), "b.ts".to_string()]);
    }

    #[test]
    fn excludes_self_from_dependents() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        with_files(&store, &["a.ts", "b.ts"]);
        let relations = RelationRepository::new(&store);
        relations.replace_file_relations("p", "a.ts", &[import("b.ts")]).unwrap();
        relations.replace_file_relations("p", "b.ts", &[import("a.ts")]).unwrap();

        let graph = DependencyGraph::build(&store, "p").unwrap();
        assert!(!graph.get_transitive_dependents("a.ts").contains(&"a.ts".to_string()));
    }

    #[test]
    fn detects_cycle() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        with_files(&store, &["a.ts", "b.ts"]);
        let relations = RelationRepository::new(&store);
        relations.replace_file_relations("p", "a.ts", &[import("b.ts")]).unwrap();
        relations.replace_file_relations("p", "b.ts", &[import("a.ts")]).unwrap();

        let graph = DependencyGraph::build(&store, "p").unwrap();
        assert!(graph.has_cycle());
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        with_files(&store, &["a.ts", "b.ts"]);
        let relations = RelationRepository::new(&store);
        relations.replace_file_relations("p", "a.ts", &[import("b.ts")]).unwrap();

        let graph = DependencyGraph::build(&store, "p").unwrap();
        assert!(!graph.has_cycle());
    }

    #[test]
    fn affected_by_change_unions_dependents() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "code-ledger").unwrap();
        with_files(&store, &["a.ts", "b.ts", "c.ts"]);
        let relations = RelationRepository::new(&store);
        relations.replace_file_relations("p", "a.ts", &[import("c.ts")]).unwrap();
        relations.replace_file_relations("p", "b.ts", &[import("c.ts")]).unwrap();

        let graph = DependencyGraph::build(&store, "p").unwrap();
        let mut affected = graph.get_affected_by_change(&["c.ts".to_string()]);
        affected.sort();
        assert_eq!(affected, vec!["a.ts".to_string(), "b.ts".to_string()]);
    }
}
