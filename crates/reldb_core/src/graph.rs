//! Save-order dependency graph over entity types.
//!
//! Edges are derived from relationship descriptors and delete
//! behaviors. An edge `a -> b` reads "b must be saved/available before
//! a can be finalized". The save pass walks types in **reverse**
//! topological order - dependents first - so a cascade fired while
//! saving one type still finds the types it touches unfinalized.

use crate::error::{CoreError, CoreResult};
use crate::schema::{Cardinality, DeleteBehavior, SchemaRegistry};
use std::collections::{BTreeMap, BTreeSet};

/// Directed dependency graph over entity type names.
///
/// Rebuilt from the registry on every save cycle; cheap because the
/// node set is the (small) set of entity types, not entities.
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    nodes: BTreeSet<&'static str>,
    edges: BTreeMap<&'static str, BTreeSet<&'static str>>,
}

/// DFS node colors: absent = unvisited, `false` = in progress,
/// `true` = finished.
type Colors = BTreeMap<&'static str, bool>;

impl DependencyGraph {
    /// Builds the graph from the registry's relationship descriptors.
    pub(crate) fn build(registry: &SchemaRegistry) -> Self {
        let mut graph = Self {
            nodes: registry.iter().map(|s| s.name).collect(),
            edges: BTreeMap::new(),
        };

        for schema in registry.iter() {
            for relation in schema.relations {
                match relation.cardinality {
                    // The owning record waits for the target it
                    // references.
                    Cardinality::ManyToOne => {
                        graph.add_edge(schema.name, relation.related);
                    }
                    // The referencing records depend on the one side
                    // still existing; the one side is processed after
                    // its dependents.
                    Cardinality::OneToMany => {
                        graph.add_edge(relation.related, schema.name);
                    }
                    Cardinality::OneToOne => match relation.on_delete {
                        DeleteBehavior::Cascade | DeleteBehavior::SetNull => {
                            graph.add_edge(relation.related, schema.name);
                        }
                        // The orphan side is cleaned by the post-save
                        // sweep, not by ordering.
                        _ => {}
                    },
                    Cardinality::ManyToMany => {
                        if relation.on_delete == DeleteBehavior::Cascade {
                            graph.add_edge(relation.related, schema.name);
                        }
                    }
                }
            }
        }

        graph
    }

    fn add_edge(&mut self, from: &'static str, to: &'static str) {
        self.edges.entry(from).or_default().insert(to);
    }

    /// Returns the type processing order for the save pass: reverse
    /// topological order, dependents first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cycle`] with the full offending path if the
    /// declarations close a dependency loop.
    pub(crate) fn save_order(&self) -> CoreResult<Vec<&'static str>> {
        let mut colors = Colors::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();

        for node in self.nodes.iter().copied() {
            if !colors.contains_key(node) {
                self.visit(node, &mut colors, &mut stack, &mut order)?;
            }
        }

        // `order` lists dependencies first; the save pass wants
        // dependents first.
        order.reverse();
        Ok(order)
    }

    fn visit(
        &self,
        node: &'static str,
        colors: &mut Colors,
        stack: &mut Vec<&'static str>,
        order: &mut Vec<&'static str>,
    ) -> CoreResult<()> {
        colors.insert(node, false);
        stack.push(node);

        if let Some(targets) = self.edges.get(node) {
            for target in targets.iter().copied() {
                match colors.get(target) {
                    Some(false) => {
                        return Err(CoreError::cycle(Self::cycle_path(stack, target)));
                    }
                    Some(true) => {}
                    None => self.visit(target, colors, stack, order)?,
                }
            }
        }

        stack.pop();
        colors.insert(node, true);
        order.push(node);
        Ok(())
    }

    /// Renders the cycle as the path from the repeated node back to
    /// itself, joined by arrows.
    fn cycle_path(stack: &[&'static str], repeated: &'static str) -> String {
        let start = stack
            .iter()
            .position(|n| *n == repeated)
            .unwrap_or_default();
        let mut path: Vec<&str> = stack[start..].to_vec();
        path.push(repeated);
        path.join(" -> ")
    }
}
