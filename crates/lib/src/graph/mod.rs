//! Resource dependency graph.
//!
//! Built from a [`Program`] without any provider calls. Each declaration becomes
//! a node; an edge runs from a dependency to the resource that consumes one of
//! its outputs (or names it in `depends_on`).

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::resource::{Declaration, Program, ResourceId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("resource '{0}' is declared more than once")]
  DuplicateResource(ResourceId),

  #[error("dependency cycle: {}", format_cycle(.0))]
  CyclicDependency(Vec<ResourceId>),

  #[error("resource '{resource}' references undeclared resource '{missing}'")]
  UnknownResource { resource: ResourceId, missing: ResourceId },
}

fn format_cycle(path: &[ResourceId]) -> String {
  path.iter().map(ResourceId::as_str).collect::<Vec<_>>().join(" -> ")
}

/// A declared resource inside the graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
  pub declaration: Declaration,
  /// Position in the program, used to break ordering ties.
  pub order: usize,
}

impl ResourceNode {
  pub fn id(&self) -> &ResourceId {
    &self.declaration.id
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  InProgress,
  Done,
}

/// Acyclic graph of declared resources.
#[derive(Debug, Default)]
pub struct ResourceGraph {
  graph: DiGraph<ResourceNode, ()>,
  nodes: HashMap<ResourceId, NodeIndex>,
}

impl ResourceGraph {
  /// Build the graph for a program.
  ///
  /// # Errors
  ///
  /// - `DuplicateResource` when two declarations share a logical name
  /// - `UnknownResource` when an input or `depends_on` names an undeclared resource
  /// - `CyclicDependency` for self references and transitive cycles
  pub fn build(program: &Program) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for (order, declaration) in program.declarations().iter().enumerate() {
      if nodes.contains_key(&declaration.id) {
        return Err(GraphError::DuplicateResource(declaration.id.clone()));
      }
      let idx = graph.add_node(ResourceNode {
        declaration: declaration.clone(),
        order,
      });
      nodes.insert(declaration.id.clone(), idx);
    }

    for declaration in program.declarations() {
      let dependent = nodes[&declaration.id];
      for dep in declared_dependencies(declaration) {
        let Some(&dep_idx) = nodes.get(&dep) else {
          return Err(GraphError::UnknownResource {
            resource: declaration.id.clone(),
            missing: dep,
          });
        };
        if graph.find_edge(dep_idx, dependent).is_none() {
          graph.add_edge(dep_idx, dependent, ());
        }
      }
    }

    let built = Self { graph, nodes };
    built.verify_acyclic()?;

    debug!(
      nodes = built.graph.node_count(),
      edges = built.graph.edge_count(),
      "built resource graph"
    );

    Ok(built)
  }

  /// Three-colour depth-first search. Reports the first cycle found, walking
  /// roots in declaration order so the reported path is stable.
  fn verify_acyclic(&self) -> Result<(), GraphError> {
    let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();
    let mut stack: Vec<NodeIndex> = Vec::new();

    for idx in self.ordered_indices() {
      if !marks.contains_key(&idx)
        && let Some(cycle) = self.visit(idx, &mut marks, &mut stack)
      {
        return Err(GraphError::CyclicDependency(cycle));
      }
    }
    Ok(())
  }

  fn visit(
    &self,
    idx: NodeIndex,
    marks: &mut HashMap<NodeIndex, Mark>,
    stack: &mut Vec<NodeIndex>,
  ) -> Option<Vec<ResourceId>> {
    marks.insert(idx, Mark::InProgress);
    stack.push(idx);

    for dep in self.sorted_neighbors(idx, Direction::Incoming) {
      match marks.get(&dep) {
        Some(Mark::Done) => {}
        Some(Mark::InProgress) => {
          let start = stack.iter().position(|&i| i == dep).unwrap_or(0);
          let mut cycle: Vec<ResourceId> = stack[start..].iter().map(|&i| self.graph[i].id().clone()).collect();
          cycle.push(self.graph[dep].id().clone());
          return Some(cycle);
        }
        None => {
          if let Some(cycle) = self.visit(dep, marks, stack) {
            return Some(cycle);
          }
        }
      }
    }

    stack.pop();
    marks.insert(idx, Mark::Done);
    None
  }

  fn ordered_indices(&self) -> Vec<NodeIndex> {
    let mut indices: Vec<NodeIndex> = self.graph.node_indices().collect();
    indices.sort_by_key(|&idx| self.graph[idx].order);
    indices
  }

  fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
    let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
    neighbors.sort_by_key(|&n| self.graph[n].order);
    neighbors
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn contains(&self, id: &ResourceId) -> bool {
    self.nodes.contains_key(id)
  }

  pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
    self.nodes.get(id).map(|&idx| &self.graph[idx])
  }

  /// Nodes in declaration order.
  pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
    self.ordered_indices().into_iter().map(|idx| &self.graph[idx])
  }

  /// Direct dependencies of a resource.
  pub fn dependencies(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
    self.neighbor_ids(id, Direction::Incoming)
  }

  /// Resources that directly depend on `id`.
  pub fn dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
    self.neighbor_ids(id, Direction::Outgoing)
  }

  fn neighbor_ids(&self, id: &ResourceId, direction: Direction) -> BTreeSet<ResourceId> {
    self
      .nodes
      .get(id)
      .map(|&idx| {
        self
          .graph
          .neighbors_directed(idx, direction)
          .map(|n| self.graph[n].id().clone())
          .collect()
      })
      .unwrap_or_default()
  }

  /// True if `from` can reach `to` by following dependency edges.
  pub fn depends_transitively(&self, from: &ResourceId, to: &ResourceId) -> bool {
    let (Some(&start), Some(&target)) = (self.nodes.get(from), self.nodes.get(to)) else {
      return false;
    };
    petgraph::algo::has_path_connecting(&self.graph, target, start, None)
  }

  /// Topological order. Among ready nodes the earliest declared goes first.
  pub fn topological_order(&self) -> Vec<ResourceId> {
    self.waves().into_iter().flatten().collect()
  }

  /// Groups of resources whose dependencies all appear in earlier groups.
  pub fn waves(&self) -> Vec<Vec<ResourceId>> {
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    let mut waves = Vec::new();
    let mut ready: Vec<NodeIndex> = self
      .ordered_indices()
      .into_iter()
      .filter(|idx| in_degree[idx] == 0)
      .collect();

    while !ready.is_empty() {
      let mut next = Vec::new();
      for &idx in &ready {
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&dependent) {
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
              next.push(dependent);
            }
          }
        }
      }
      next.sort_by_key(|&idx| self.graph[idx].order);
      next.dedup();
      waves.push(ready.iter().map(|&idx| self.graph[idx].id().clone()).collect());
      ready = next;
    }

    waves
  }
}

/// Dependencies visible before any output is resolved.
pub fn declared_dependencies(declaration: &Declaration) -> BTreeSet<ResourceId> {
  let mut deps: BTreeSet<ResourceId> = declaration.inputs.values().flat_map(|input| input.dependencies()).collect();
  deps.extend(declaration.options.depends_on.iter().cloned());
  deps
}
