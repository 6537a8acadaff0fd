//! Graph builder: resolves every pass input, checks contracts and
//! persistence, orders passes dependency-first and counts the readers of
//! each output for reference-counted release.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::component::ComponentInstance;
use crate::error::GraphError;
use crate::input_ref::{InputRef, OutputRef};
use crate::pass::{OrderedMap, PassDef, UiGroup};
use crate::texture::TextureDesc;

// ---------------------------------------------------------------------------
// Execution plan types
// ---------------------------------------------------------------------------

/// An input source after template inputs have been bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolvedSource {
    Output { pass: String, output: String },
    Prev { output: String },
    Asset { name: String },
}

impl ResolvedSource {
    pub fn output_ref(&self) -> Option<OutputRef> {
        match self {
            Self::Output { pass, output } => Some(OutputRef::new(pass, output)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedInput {
    pub key: String,
    pub uniform: String,
    pub source: ResolvedSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassNode {
    #[serde(flatten)]
    pub def: PassDef,
    pub resolved_inputs: Vec<ResolvedInput>,
}

impl PassNode {
    pub fn id(&self) -> &str {
        &self.def.id
    }
}

/// Immutable execution plan. Holds no GPU resources and can back any
/// number of runtimes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    /// Topologically sorted.
    pub passes: Vec<PassNode>,
    pub output: OutputRef,
    /// Output key -> number of `Output`-kind consumers.
    pub usage_counts: BTreeMap<OutputRef, u32>,
    pub ui_groups: OrderedMap<UiGroup>,
    pub time_offset: f32,
}

impl Graph {
    pub fn pass(&self, id: &str) -> Option<&PassNode> {
        self.passes.iter().find(|p| p.def.id == id)
    }

    pub fn output_desc(&self, r: &OutputRef) -> Option<&TextureDesc> {
        self.pass(&r.pass).and_then(|p| p.def.outputs.get(&r.output))
    }

    /// Visible uniforms clustered by `ui.group` (default: the pass id).
    /// Groups with an `order` come first, ascending; the rest keep their
    /// first-appearance order.
    pub fn parameter_groups(&self) -> Vec<ParameterGroup> {
        let mut groups: Vec<ParameterGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for pass in &self.passes {
            for (name, spec) in &pass.def.uniforms {
                if !spec.is_visible() {
                    continue;
                }
                let ui = spec.ui.as_ref();
                let group_id = ui
                    .and_then(|ui| ui.group.clone())
                    .unwrap_or_else(|| pass.def.id.clone());
                let slot = *index.entry(group_id.clone()).or_insert_with(|| {
                    let meta = self.ui_groups.get(&group_id);
                    groups.push(ParameterGroup {
                        label: meta
                            .and_then(|m| m.label.clone())
                            .unwrap_or_else(|| group_id.clone()),
                        collapsed: meta.and_then(|m| m.collapsed).unwrap_or(false),
                        order: meta.and_then(|m| m.order),
                        id: group_id.clone(),
                        params: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[slot].params.push(ParameterRef {
                    pass: pass.def.id.clone(),
                    uniform: name.clone(),
                    label: ui
                        .and_then(|ui| ui.label.clone())
                        .unwrap_or_else(|| name.clone()),
                });
            }
        }
        // Stable sort keeps first-appearance order among equal keys.
        groups.sort_by(|a, b| match (a.order, b.order) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        groups
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterGroup {
    pub id: String,
    pub label: String,
    pub collapsed: bool,
    pub order: Option<f32>,
    pub params: Vec<ParameterRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRef {
    pub pass: String,
    pub uniform: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct GraphBuilder {
    passes: Vec<PassDef>,
    output: Option<OutputRef>,
    ui_groups: OrderedMap<UiGroup>,
    time_offset: f32,
    assets: Option<HashSet<String>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(mut self, pass: PassDef) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn add_component(mut self, instance: ComponentInstance) -> Self {
        self.passes.extend(instance.passes);
        self
    }

    pub fn output(mut self, output: OutputRef) -> Self {
        self.output = Some(output);
        self
    }

    pub fn ui_groups(mut self, groups: OrderedMap<UiGroup>) -> Self {
        self.ui_groups = groups;
        self
    }

    pub fn time_offset(mut self, seconds: f32) -> Self {
        self.time_offset = seconds;
        self
    }

    /// Restrict `$asset.*` references to these names.
    pub fn known_assets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        let output = self
            .output
            .clone()
            .ok_or_else(|| GraphError::Reference("Graph output not set.".to_string()))?;

        let mut ids: HashMap<&str, usize> = HashMap::new();
        for (i, pass) in self.passes.iter().enumerate() {
            if ids.insert(pass.id.as_str(), i).is_some() {
                return Err(GraphError::Reference(format!("Duplicate pass id \"{}\".", pass.id)));
            }
            pass.validate_input_sizing()?;
        }

        let mut nodes = Vec::with_capacity(self.passes.len());
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.passes.len()];
        for (i, pass) in self.passes.iter().enumerate() {
            let mut resolved_inputs = Vec::with_capacity(pass.inputs.len());
            for (key, input) in &pass.inputs {
                let label = format!("pass \"{}\" input \"{}\"", pass.id, key);
                let source = match &input.source {
                    InputRef::Output(r) => {
                        let producer = *ids.get(r.pass.as_str()).ok_or_else(|| {
                            GraphError::Reference(format!(
                                "Pass \"{}\" references unknown pass \"{}\".",
                                pass.id, r.pass
                            ))
                        })?;
                        let desc = self.passes[producer].outputs.get(&r.output).ok_or_else(|| {
                            GraphError::Reference(format!(
                                "Pass \"{}\" references missing output \"{}\".",
                                pass.id, r
                            ))
                        })?;
                        if producer == i {
                            return Err(GraphError::Cycle(format!(
                                "Pass \"{}\" reads its own output \"{}\"; use \"$prev.{}\" for feedback.",
                                pass.id, r.output, r.output
                            )));
                        }
                        if let Some(expected) = &input.expected {
                            expected.check(&label, desc)?;
                        }
                        deps[i].insert(producer);
                        ResolvedSource::Output {
                            pass: r.pass.clone(),
                            output: r.output.clone(),
                        }
                    }
                    InputRef::Prev { output: name } => {
                        let desc = pass.outputs.get(name).ok_or_else(|| {
                            GraphError::Reference(format!(
                                "Pass \"{}\" references missing output \"$prev.{}\".",
                                pass.id, name
                            ))
                        })?;
                        if !desc.persistent {
                            return Err(GraphError::Reference(format!(
                                "Pass \"{}\" reads \"$prev.{}\" but that output is not persistent.",
                                pass.id, name
                            )));
                        }
                        if let Some(expected) = &input.expected {
                            expected.check(&label, desc)?;
                        }
                        ResolvedSource::Prev {
                            output: name.clone(),
                        }
                    }
                    InputRef::Asset { name } => {
                        if let Some(assets) = &self.assets {
                            if !assets.contains(name) {
                                return Err(GraphError::Reference(format!(
                                    "Missing asset \"{}\" for pass \"{}\".",
                                    name, pass.id
                                )));
                            }
                        }
                        ResolvedSource::Asset { name: name.clone() }
                    }
                    InputRef::TemplateInput { name } => {
                        return Err(GraphError::Reference(format!(
                            "Pass \"{}\" has unresolved template input \"$input.{}\".",
                            pass.id, name
                        )))
                    }
                };
                resolved_inputs.push(ResolvedInput {
                    key: key.clone(),
                    uniform: input.uniform_name(key).to_string(),
                    source,
                });
            }
            nodes.push(PassNode {
                def: pass.clone(),
                resolved_inputs,
            });
        }

        let order = topo_sort(&deps).map_err(|stuck| {
            let names: Vec<&str> = stuck.iter().map(|&i| self.passes[i].id.as_str()).collect();
            GraphError::Cycle(format!("Cycle detected between passes: {}", names.join(", ")))
        })?;

        let mut usage_counts = BTreeMap::new();
        for pass in &self.passes {
            for name in pass.outputs.keys() {
                usage_counts.insert(OutputRef::new(&pass.id, name), 0u32);
            }
        }
        for node in &nodes {
            for input in &node.resolved_inputs {
                if let Some(r) = input.source.output_ref() {
                    *usage_counts.entry(r).or_insert(0) += 1;
                }
            }
        }
        if !usage_counts.contains_key(&output) {
            return Err(GraphError::Reference(format!(
                "Graph output \"{}\" does not exist.",
                output
            )));
        }

        let mut slots: Vec<Option<PassNode>> = nodes.into_iter().map(Some).collect();
        let passes: Vec<PassNode> = order.iter().filter_map(|&i| slots[i].take()).collect();

        tracing::info!(
            "Built graph with {} passes, output \"{}\"",
            passes.len(),
            output
        );
        Ok(Graph {
            passes,
            output,
            usage_counts,
            ui_groups: self.ui_groups,
            time_offset: self.time_offset,
        })
    }
}

/// Convenience wrapper over [`GraphBuilder`]. Component passes are placed
/// ahead of inline passes in declaration order.
pub fn build(
    passes: Vec<PassDef>,
    components: Vec<ComponentInstance>,
    output: OutputRef,
    ui_groups: Option<OrderedMap<UiGroup>>,
) -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new().output(output);
    for instance in components {
        builder = builder.add_component(instance);
    }
    for pass in passes {
        builder = builder.add_pass(pass);
    }
    if let Some(groups) = ui_groups {
        builder = builder.ui_groups(groups);
    }
    builder.build()
}

/// Kahn's algorithm over `deps[i]` = passes that must run before `i`.
/// Ready passes are taken lowest index first, so declaration order breaks
/// ties. On a cycle, returns the passes that could not be placed.
fn topo_sort(deps: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];
    let mut in_degree: Vec<usize> = vec![0; n];
    for (i, before) in deps.iter().enumerate() {
        for &d in before {
            dependents[d].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != n {
        return Err((0..n).filter(|&i| in_degree[i] > 0).collect());
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{ComponentSpec, UniformSpec, UniformType, UniformUi, UniformValue};
    use crate::texture::{SizeSpec, TextureFormat};

    fn full() -> TextureDesc {
        TextureDesc::new(TextureFormat::Rgba8, SizeSpec::Full)
    }

    fn pass(id: &str, inputs: &[(&str, &str)]) -> PassDef {
        let mut p = PassDef::new(id, "void main() {}").with_output("out", full());
        for (key, source) in inputs {
            p = p.with_input(key, source).unwrap();
        }
        p
    }

    fn order(graph: &Graph) -> Vec<&str> {
        graph.passes.iter().map(|p| p.id()).collect()
    }

    #[test]
    fn test_sorts_dependencies_before_consumers() {
        let graph = GraphBuilder::new()
            .add_pass(pass("composite", &[("a", "blur.out"), ("b", "scene.out")]))
            .add_pass(pass("blur", &[("src", "scene.out")]))
            .add_pass(pass("scene", &[]))
            .output(OutputRef::new("composite", "out"))
            .build()
            .unwrap();
        assert_eq!(order(&graph), ["scene", "blur", "composite"]);
    }

    #[test]
    fn test_independent_passes_keep_declaration_order() {
        let graph = GraphBuilder::new()
            .add_pass(pass("c", &[]))
            .add_pass(pass("a", &[]))
            .add_pass(pass("b", &[]))
            .add_pass(pass("mix", &[("x", "b.out"), ("y", "c.out"), ("z", "a.out")]))
            .output(OutputRef::new("mix", "out"))
            .build()
            .unwrap();
        assert_eq!(order(&graph), ["c", "a", "b", "mix"]);
    }

    #[test]
    fn test_self_reference_is_cycle_and_removal_builds() {
        let looped = GraphBuilder::new()
            .add_pass(pass("p", &[("self", "p.out")]))
            .output(OutputRef::new("p", "out"))
            .build();
        assert!(matches!(looped, Err(GraphError::Cycle(_))));

        let fixed = GraphBuilder::new()
            .add_pass(pass("p", &[]))
            .output(OutputRef::new("p", "out"))
            .build();
        assert!(fixed.is_ok());
    }

    #[test]
    fn test_two_pass_cycle_names_passes() {
        let err = GraphBuilder::new()
            .add_pass(pass("a", &[("x", "b.out")]))
            .add_pass(pass("b", &[("x", "a.out")]))
            .output(OutputRef::new("a", "out"))
            .build()
            .unwrap_err();
        match err {
            GraphError::Cycle(msg) => assert!(msg.contains("\"a\"") || msg.contains("a, b")),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_pass_and_output_are_reference_errors() {
        let unknown_pass = GraphBuilder::new()
            .add_pass(pass("a", &[("x", "ghost.out")]))
            .output(OutputRef::new("a", "out"))
            .build();
        assert!(matches!(unknown_pass, Err(GraphError::Reference(_))));

        let unknown_output = GraphBuilder::new()
            .add_pass(pass("a", &[]))
            .add_pass(pass("b", &[("x", "a.missing")]))
            .output(OutputRef::new("b", "out"))
            .build();
        assert!(matches!(unknown_output, Err(GraphError::Reference(_))));

        let bad_graph_output = GraphBuilder::new()
            .add_pass(pass("a", &[]))
            .output(OutputRef::new("a", "nope"))
            .build();
        assert!(matches!(bad_graph_output, Err(GraphError::Reference(_))));
    }

    #[test]
    fn test_prev_requires_persistent_output() {
        let not_persistent = GraphBuilder::new()
            .add_pass(pass("fb", &[("prev", "$prev.out")]))
            .output(OutputRef::new("fb", "out"))
            .build();
        assert!(matches!(not_persistent, Err(GraphError::Reference(_))));

        let feedback = PassDef::new("fb", "")
            .with_output("out", full().persistent())
            .with_input("prev", "$prev.out")
            .unwrap();
        let graph = GraphBuilder::new()
            .add_pass(feedback)
            .output(OutputRef::new("fb", "out"))
            .build()
            .unwrap();
        assert_eq!(
            graph.passes[0].resolved_inputs[0].source,
            ResolvedSource::Prev { output: "out".into() }
        );
        // Feedback does not count as a consumer.
        assert_eq!(graph.usage_counts[&OutputRef::new("fb", "out")], 0);
    }

    #[test]
    fn test_expected_contract_is_checked() {
        let mut consumer = pass("b", &[("src", "a.out")]);
        consumer.inputs.get_mut("src").unwrap().expected = Some(crate::texture::TextureContract {
            format: Some(TextureFormat::Rgba16f),
            ..Default::default()
        });
        let err = GraphBuilder::new()
            .add_pass(pass("a", &[]))
            .add_pass(consumer)
            .output(OutputRef::new("b", "out"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::Contract { .. }));
    }

    #[test]
    fn test_usage_counts_two_consumers() {
        let graph = GraphBuilder::new()
            .add_pass(pass("src", &[]))
            .add_pass(pass("l", &[("x", "src.out")]))
            .add_pass(pass("r", &[("x", "src.out")]))
            .add_pass(pass("mix", &[("a", "l.out"), ("b", "r.out")]))
            .output(OutputRef::new("mix", "out"))
            .build()
            .unwrap();
        assert_eq!(graph.usage_counts[&OutputRef::new("src", "out")], 2);
        assert_eq!(graph.usage_counts[&OutputRef::new("mix", "out")], 0);
    }

    #[test]
    fn test_asset_refs_checked_when_known() {
        let reader = pass("p", &[("img", "$asset.photo")]);
        let missing = GraphBuilder::new()
            .add_pass(reader.clone())
            .output(OutputRef::new("p", "out"))
            .known_assets(["other"])
            .build();
        assert!(matches!(missing, Err(GraphError::Reference(_))));
        let ok = GraphBuilder::new()
            .add_pass(reader)
            .output(OutputRef::new("p", "out"))
            .known_assets(["photo"])
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_component_passes_join_the_graph() {
        let spec: ComponentSpec = serde_json::from_str(
            r#"{
                "name": "tint",
                "inputs": { "src": {} },
                "outputs": { "out": { "ref": "t.out" } },
                "passes": [{
                    "id": "t",
                    "fragment": "t",
                    "inputs": { "src": { "source": "$input.src" } },
                    "outputs": { "out": { "format": "rgba8", "size": { "kind": "full" } } }
                }]
            }"#,
        )
        .unwrap();
        let bindings = [("src".to_string(), InputRef::parse("scene.out").unwrap())]
            .into_iter()
            .collect();
        let inst = spec.instantiate("fx", &bindings, None).unwrap();
        let graph = build(
            vec![pass("scene", &[])],
            vec![inst],
            OutputRef::new("fx.t", "out"),
            None,
        )
        .unwrap();
        assert_eq!(order(&graph), ["scene", "fx.t"]);
        assert_eq!(graph.usage_counts[&OutputRef::new("scene", "out")], 1);
    }

    #[test]
    fn test_parameter_groups_follow_ui_metadata() {
        let mut a = pass("a", &[]);
        a = a.with_uniform("uGain", UniformSpec::new(UniformType::F1, UniformValue::Scalar(1.0)));
        let mut hidden = UniformSpec::new(UniformType::F1, UniformValue::Scalar(8.0));
        hidden.ui = Some(UniformUi::hidden());
        a = a.with_uniform("uLutSize", hidden);
        let mut grouped = UniformSpec::new(UniformType::F2, UniformValue::Vector(vec![0.0, 1.0]));
        grouped.ui = Some(UniformUi {
            group: Some("look".into()),
            label: Some("Range".into()),
            ..Default::default()
        });
        let b = pass("b", &[("x", "a.out")]).with_uniform("uRange", grouped);

        let mut ui_groups = OrderedMap::new();
        ui_groups.insert(
            "look".to_string(),
            UiGroup {
                label: Some("Look".into()),
                order: Some(0.0),
                collapsed: Some(true),
            },
        );
        let graph = GraphBuilder::new()
            .add_pass(a)
            .add_pass(b)
            .output(OutputRef::new("b", "out"))
            .ui_groups(ui_groups)
            .build()
            .unwrap();

        let groups = graph.parameter_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "Look");
        assert!(groups[0].collapsed);
        assert_eq!(groups[0].params[0].label, "Range");
        assert_eq!(groups[1].id, "a");
        let names: Vec<&str> = groups[1].params.iter().map(|p| p.uniform.as_str()).collect();
        assert_eq!(names, ["uGain"]);
    }
}
