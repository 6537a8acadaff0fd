//! Turns one declared graph of a [`Project`] into a built [`Graph`]:
//! instantiates its components, rewires references to component outputs,
//! checks asset references and injects LUT sizes.

use std::collections::{HashMap, HashSet};

use shadergraph_core::{
    ComponentInstance, Graph, GraphBuilder, GraphError, InputRef, OrderedMap, OutputRef, PassDef,
    UniformSpec, UniformType, UniformUi, UniformValue, SCALE_EPSILON,
};

use super::Project;

pub const LUT_SIZE_UNIFORM: &str = "uLutSize";

/// `"<instanceId>.<outputName>"` -> source, for every instantiated component.
struct ComponentOutputs(HashMap<OutputRef, InputRef>);

impl ComponentOutputs {
    /// Follows component outputs until reaching a pass output or an asset.
    /// An instance bound to another instance's output resolves through both.
    fn resolve(&self, source: &InputRef) -> Result<InputRef, GraphError> {
        let mut current = source.clone();
        let mut seen = HashSet::new();
        while let InputRef::Output(r) = &current {
            let Some(next) = self.0.get(r) else {
                break;
            };
            if !seen.insert(r.clone()) {
                return Err(GraphError::Cycle(format!(
                    "Component outputs reference each other through \"{}\".",
                    r
                )));
            }
            current = next.clone();
        }
        Ok(current)
    }

    fn rewrite_inputs(&self, mut pass: PassDef) -> Result<PassDef, GraphError> {
        for (_, input) in pass.inputs.iter_mut() {
            input.source = self.resolve(&input.source)?;
        }
        Ok(pass)
    }
}

fn parse_bindings(
    instance_id: &str,
    raw: &OrderedMap<String>,
) -> Result<OrderedMap<InputRef>, GraphError> {
    let mut bindings = OrderedMap::new();
    for (name, source) in raw {
        let parsed = InputRef::parse(source)?;
        if matches!(parsed, InputRef::TemplateInput { .. } | InputRef::Prev { .. }) {
            return Err(GraphError::Schema(format!(
                "Component instance \"{}\" binding \"{}\" cannot use a {} reference.",
                instance_id,
                name,
                parsed.kind_name()
            )));
        }
        bindings.insert(name.clone(), parsed);
    }
    Ok(bindings)
}

impl Project {
    fn check_asset_refs(&self, pass: &PassDef) -> Result<(), GraphError> {
        for input in pass.inputs.values() {
            if let InputRef::Asset { name } = &input.source {
                if !self.assets.contains_key(name) {
                    return Err(GraphError::Reference(format!(
                        "Missing asset \"{}\" for pass \"{}\".",
                        name, pass.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Adds a hidden `uLutSize` when the pass samples LUT assets. All LUTs
    /// read by one pass must agree on their size.
    fn apply_lut_size(&self, mut pass: PassDef) -> Result<PassDef, GraphError> {
        let mut lut_size: Option<f32> = None;
        for input in pass.inputs.values() {
            let InputRef::Asset { name } = &input.source else {
                continue;
            };
            let Some(size) = self.assets.get(name).and_then(|a| a.lut_size) else {
                continue;
            };
            if let Some(existing) = lut_size {
                if (existing - size).abs() > SCALE_EPSILON {
                    return Err(GraphError::Schema(format!(
                        "Pass \"{}\" references assets with different LUT sizes.",
                        pass.id
                    )));
                }
            }
            lut_size = Some(size);
        }
        if let Some(size) = lut_size {
            let mut spec = UniformSpec::new(UniformType::F1, UniformValue::Scalar(size));
            spec.ui = Some(UniformUi::hidden());
            pass.uniforms.insert(LUT_SIZE_UNIFORM.to_string(), spec);
        }
        Ok(pass)
    }

    fn prepare_pass(&self, outputs: &ComponentOutputs, pass: PassDef) -> Result<PassDef, GraphError> {
        let pass = outputs.rewrite_inputs(pass)?;
        self.check_asset_refs(&pass)?;
        self.apply_lut_size(pass)
    }
}

/// Builds the graph named `name`. Component passes come first, in instance
/// order, followed by the graph's own passes.
pub fn build_graph(project: &Project, name: &str) -> Result<Graph, GraphError> {
    let source = project
        .graphs
        .get(name)
        .ok_or_else(|| GraphError::Reference(format!("Graph \"{}\" not found in project.", name)))?;

    let mut instances: Vec<ComponentInstance> = Vec::with_capacity(source.components.len());
    let mut outputs = ComponentOutputs(HashMap::new());
    let mut instance_ids = HashSet::new();
    for instance in &source.components {
        if !instance_ids.insert(instance.id.as_str()) {
            return Err(GraphError::Schema(format!(
                "Graph \"{}\" has duplicate component instance id \"{}\".",
                name, instance.id
            )));
        }
        let spec = project.components.get(&instance.component).ok_or_else(|| {
            GraphError::Reference(format!(
                "Component \"{}\" not found in project.",
                instance.component
            ))
        })?;
        let bindings = parse_bindings(&instance.id, &instance.bindings)?;
        let instantiated = spec.instantiate(&instance.id, &bindings, instance.uniforms.as_ref())?;
        for (output, source) in &instantiated.outputs {
            outputs
                .0
                .insert(OutputRef::new(&instance.id, output), source.clone());
        }
        instances.push(instantiated);
    }

    let mut builder = GraphBuilder::new().known_assets(project.assets.keys().cloned());
    for mut instance in instances {
        instance.passes = instance
            .passes
            .into_iter()
            .map(|pass| project.prepare_pass(&outputs, pass))
            .collect::<Result<_, _>>()?;
        builder = builder.add_component(instance);
    }
    for pass in &source.passes {
        builder = builder.add_pass(project.prepare_pass(&outputs, pass.clone())?);
    }

    let output = match outputs.resolve(&InputRef::Output(source.output.clone()))? {
        InputRef::Output(r) => r,
        other => {
            return Err(GraphError::Reference(format!(
                "Graph \"{}\" output \"{}\" resolves to {}, not a pass output.",
                name, source.output, other
            )))
        }
    };

    builder
        .output(output)
        .ui_groups(source.ui_groups.clone())
        .time_offset(source.time_offset)
        .build()
}
