use crate::{ModuleDescriptor, ModuleKind};
use std::collections::{BTreeMap, HashSet};

/// Errors returned when validating a module graph.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two modules share a name.
    #[error("duplicate module name: {0}")]
    DuplicateModule(String),
    /// A module input references a module that does not exist.
    #[error("module {module} has unknown input module {input}")]
    UnknownInput {
        /// Module declaring the input.
        module: String,
        /// The missing upstream name.
        input: String,
    },
    /// A module input references a mapper through a store handle, or a store
    /// through a map input.
    #[error("module {module} input {input} has mismatched kind: expected {expected:?}")]
    KindMismatch {
        /// Module declaring the input.
        module: String,
        /// The upstream name.
        input: String,
        /// Kind the input requires the upstream to be.
        expected: ModuleKind,
    },
    /// The graph contains a dependency cycle.
    #[error("dependency cycle involving module {0}")]
    Cycle(String),
}

/// A validated directed acyclic graph of modules.
///
/// Construction checks that every input resolves to a module of the right
/// kind and that no cycles exist; the execution order is fixed at build time
/// and deterministic for a given set of descriptors.
#[derive(Clone, Debug)]
pub struct ModuleGraph {
    modules: BTreeMap<String, ModuleDescriptor>,
    execution_order: Vec<String>,
}

impl ModuleGraph {
    /// Validates the descriptors and computes a topological execution order.
    pub fn new(descriptors: Vec<ModuleDescriptor>) -> Result<Self, GraphError> {
        let mut modules = BTreeMap::new();
        for desc in descriptors {
            let name = desc.name.clone();
            if modules.insert(name.clone(), desc).is_some() {
                return Err(GraphError::DuplicateModule(name));
            }
        }

        for desc in modules.values() {
            for input in &desc.inputs {
                let Some(dep) = input.dependency() else { continue };
                let Some(upstream) = modules.get(dep) else {
                    return Err(GraphError::UnknownInput {
                        module: desc.name.clone(),
                        input: dep.to_owned(),
                    });
                };
                let expected = match input {
                    crate::Input::Store { .. } => ModuleKind::Store,
                    _ => ModuleKind::Map,
                };
                if upstream.kind != expected {
                    return Err(GraphError::KindMismatch {
                        module: desc.name.clone(),
                        input: dep.to_owned(),
                        expected,
                    });
                }
            }
        }

        let execution_order = topo_sort(&modules)?;
        Ok(Self { modules, execution_order })
    }

    /// Module names in execution (topological) order.
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Looks up a module descriptor by name.
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    /// Iterates descriptors in execution order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.execution_order.iter().map(|name| &self.modules[name])
    }

    /// Store modules, in execution order.
    pub fn stores(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules().filter(|m| m.is_store())
    }

    /// Names of the modules `name` directly depends on.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.modules
            .get(name)
            .map(|desc| desc.inputs.iter().filter_map(|i| i.dependency()).collect())
            .unwrap_or_default()
    }
}

/// Depth-first topological sort. The `BTreeMap` iteration order makes the
/// result deterministic across runs.
fn topo_sort(modules: &BTreeMap<String, ModuleDescriptor>) -> Result<Vec<String>, GraphError> {
    let mut order = Vec::with_capacity(modules.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        modules: &'a BTreeMap<String, ModuleDescriptor>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if visited.contains(name) {
            return Ok(());
        }
        if !in_stack.insert(name) {
            return Err(GraphError::Cycle(name.to_owned()));
        }
        for input in &modules[name].inputs {
            if let Some(dep) = input.dependency() {
                visit(dep, modules, visited, in_stack, order)?;
            }
        }
        in_stack.remove(name);
        visited.insert(name);
        order.push(name.to_owned());
        Ok(())
    }

    for name in modules.keys() {
        visit(name, modules, &mut visited, &mut in_stack, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Input, ModuleHash, StoreMode, UpdatePolicy, ValueType};
    use assert_matches::assert_matches;

    fn mapper(name: &str, inputs: Vec<Input>) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_owned(),
            hash: ModuleHash::new(format!("{name}.hash")),
            initial_block: 0,
            kind: ModuleKind::Map,
            inputs,
            output_type: Some("proto:test.Output".to_owned()),
            update_policy: None,
            value_type: None,
            entrypoint: name.to_owned(),
        }
    }

    fn store(name: &str, inputs: Vec<Input>) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_owned(),
            hash: ModuleHash::new(format!("{name}.hash")),
            initial_block: 0,
            kind: ModuleKind::Store,
            inputs,
            output_type: None,
            update_policy: Some(UpdatePolicy::Set),
            value_type: Some(ValueType::Bytes),
            entrypoint: name.to_owned(),
        }
    }

    fn source() -> Input {
        Input::Source { name: "sf.blocks".to_owned() }
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let graph = ModuleGraph::new(vec![
            mapper("c", vec![Input::Map { module: "b".into() }]),
            store("b", vec![Input::Map { module: "a".into() }]),
            mapper("a", vec![source()]),
        ])
        .unwrap();

        assert_eq!(graph.execution_order(), ["a", "b", "c"]);
        assert_eq!(graph.dependencies_of("c"), ["b"]);
        assert!(graph.dependencies_of("a").is_empty());
    }

    #[test]
    fn diamond_is_deterministic() {
        let build = || {
            ModuleGraph::new(vec![
                mapper("a", vec![source()]),
                mapper("left", vec![Input::Map { module: "a".into() }]),
                mapper("right", vec![Input::Map { module: "a".into() }]),
                mapper(
                    "sink",
                    vec![
                        Input::Map { module: "left".into() },
                        Input::Map { module: "right".into() },
                    ],
                ),
            ])
            .unwrap()
        };
        assert_eq!(build().execution_order(), build().execution_order());
    }

    #[test]
    fn cycle_is_rejected() {
        let res = ModuleGraph::new(vec![
            mapper("a", vec![Input::Map { module: "b".into() }]),
            mapper("b", vec![Input::Map { module: "a".into() }]),
        ]);
        assert_matches!(res, Err(GraphError::Cycle(_)));
    }

    #[test]
    fn unknown_input_is_rejected() {
        let res = ModuleGraph::new(vec![mapper("a", vec![Input::Map { module: "ghost".into() }])]);
        assert_matches!(
            res,
            Err(GraphError::UnknownInput { module, input }) if module == "a" && input == "ghost"
        );
    }

    #[test]
    fn store_input_must_point_at_store() {
        let res = ModuleGraph::new(vec![
            mapper("a", vec![source()]),
            mapper(
                "b",
                vec![Input::Store { module: "a".into(), mode: StoreMode::Get }],
            ),
        ]);
        assert_matches!(
            res,
            Err(GraphError::KindMismatch { expected: ModuleKind::Store, .. })
        );
    }
}
