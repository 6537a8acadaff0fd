//! Component instantiation: namespacing a pass template under an instance
//! id and wiring its `$input.*` slots to caller-supplied sources.

use std::collections::{HashMap, HashSet};

use crate::error::GraphError;
use crate::input_ref::{InputRef, OutputRef};
use crate::pass::{
    ComponentSpec, InputSpec, OrderedMap, PassDef, UniformOverride, UniformOverrides, UniformSpec,
    UniformUi,
};
use crate::texture::TextureDesc;

/// A concrete, namespaced copy of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInstance {
    pub id: String,
    pub passes: Vec<PassDef>,
    /// Component output name -> concrete source (a namespaced pass output,
    /// or whatever an `$input` passthrough was bound to).
    pub outputs: OrderedMap<InputRef>,
}

pub fn namespaced_pass_id(instance_id: &str, local_id: &str) -> String {
    format!("{}.{}", instance_id, local_id)
}

impl ComponentSpec {
    /// Self-consistency checks. Run by every instantiation; callers that
    /// instantiate the same spec often may validate once up front.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::new();
        let mut produced: HashMap<OutputRef, &TextureDesc> = HashMap::new();
        for pass in &self.passes {
            if pass.id.contains('.') {
                return Err(GraphError::Schema(format!(
                    "Component \"{}\" pass id \"{}\" must not include \".\".",
                    self.name, pass.id
                )));
            }
            if !ids.insert(pass.id.as_str()) {
                return Err(GraphError::Schema(format!(
                    "Component \"{}\" has duplicate pass id \"{}\".",
                    self.name, pass.id
                )));
            }
            for (name, desc) in &pass.outputs {
                produced.insert(OutputRef::new(&pass.id, name), desc);
            }
        }

        for pass in &self.passes {
            for (key, input) in &pass.inputs {
                if let InputRef::TemplateInput { name } = &input.source {
                    if !self.inputs.contains_key(name) {
                        return Err(GraphError::Reference(format!(
                            "Component \"{}\" pass \"{}\" input \"{}\" uses undeclared input \"$input.{}\".",
                            self.name, pass.id, key, name
                        )));
                    }
                }
            }
            pass.validate_input_sizing()?;
        }

        for (name, output) in &self.outputs {
            match &output.source {
                InputRef::TemplateInput { name: input } => {
                    if !self.inputs.contains_key(input) {
                        return Err(GraphError::Reference(format!(
                            "Component \"{}\" output \"{}\" references missing input \"{}\".",
                            self.name, name, input
                        )));
                    }
                }
                InputRef::Output(r) => {
                    let desc = produced.get(r).ok_or_else(|| {
                        GraphError::Reference(format!(
                            "Component \"{}\" output \"{}\" references missing pass output \"{}\".",
                            self.name, name, r
                        ))
                    })?;
                    if let Some(contract) = &output.contract {
                        contract.check(
                            &format!("component \"{}\" output \"{}\"", self.name, name),
                            desc,
                        )?;
                    }
                }
                other => {
                    return Err(GraphError::Schema(format!(
                        "Component \"{}\" output \"{}\" cannot reference {} sources.",
                        self.name,
                        name,
                        other.kind_name()
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn instantiate(
        &self,
        instance_id: &str,
        bindings: &OrderedMap<InputRef>,
        overrides: Option<&UniformOverrides>,
    ) -> Result<ComponentInstance, GraphError> {
        self.validate()?;

        for input in self.inputs.keys() {
            if !bindings.contains_key(input) {
                return Err(GraphError::MissingBinding {
                    component: self.name.clone(),
                    input: input.clone(),
                });
            }
        }
        if let Some(overrides) = overrides {
            for pass_id in overrides.keys() {
                if !self.passes.iter().any(|p| &p.id == pass_id) {
                    return Err(GraphError::Override(format!(
                        "Component \"{}\" has no pass \"{}\" for uniform overrides.",
                        self.name, pass_id
                    )));
                }
            }
        }

        let map_source = |source: &InputRef| -> Result<InputRef, GraphError> {
            match source {
                InputRef::TemplateInput { name } => {
                    bindings.get(name).cloned().ok_or_else(|| GraphError::MissingBinding {
                        component: self.name.clone(),
                        input: name.clone(),
                    })
                }
                InputRef::Output(r) => Ok(InputRef::Output(OutputRef::new(
                    namespaced_pass_id(instance_id, &r.pass),
                    &r.output,
                ))),
                InputRef::Prev { .. } | InputRef::Asset { .. } => Ok(source.clone()),
            }
        };

        let mut passes = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let mut inputs = OrderedMap::new();
            for (key, input) in &pass.inputs {
                let expected = match &input.source {
                    InputRef::TemplateInput { name } => input
                        .expected
                        .clone()
                        .or_else(|| self.inputs.get(name).filter(|c| !c.is_empty()).cloned()),
                    _ => input.expected.clone(),
                };
                inputs.insert(
                    key.clone(),
                    InputSpec {
                        source: map_source(&input.source)?,
                        uniform: input.uniform.clone(),
                        expected,
                    },
                );
            }

            let pass_overrides = overrides.and_then(|o| o.get(&pass.id));
            let uniforms = apply_overrides(&pass.uniforms, pass_overrides, &pass.id, instance_id)?;
            let uniforms = uniforms
                .into_iter()
                .map(|(name, mut spec)| {
                    let mut ui = spec.ui.take().unwrap_or_default();
                    ui.group.get_or_insert_with(|| instance_id.to_string());
                    spec.ui = Some(ui);
                    (name, spec)
                })
                .collect();

            passes.push(PassDef {
                id: namespaced_pass_id(instance_id, &pass.id),
                fragment: pass.fragment.clone(),
                inputs,
                outputs: pass.outputs.clone(),
                uniforms,
            });
        }

        let mut outputs = OrderedMap::new();
        for (name, output) in &self.outputs {
            outputs.insert(name.clone(), map_source(&output.source)?);
        }

        tracing::debug!(
            "Instantiated component \"{}\" as \"{}\" ({} passes)",
            self.name,
            instance_id,
            passes.len()
        );
        Ok(ComponentInstance {
            id: instance_id.to_string(),
            passes,
            outputs,
        })
    }
}

/// Free-function form of [`ComponentSpec::instantiate`].
pub fn instantiate(
    spec: &ComponentSpec,
    instance_id: &str,
    bindings: &OrderedMap<InputRef>,
    overrides: Option<&UniformOverrides>,
) -> Result<ComponentInstance, GraphError> {
    spec.instantiate(instance_id, bindings, overrides)
}

fn apply_overrides(
    uniforms: &OrderedMap<UniformSpec>,
    overrides: Option<&OrderedMap<UniformOverride>>,
    pass_id: &str,
    instance_id: &str,
) -> Result<OrderedMap<UniformSpec>, GraphError> {
    let mut next = uniforms.clone();
    let Some(overrides) = overrides else {
        return Ok(next);
    };
    for (name, over) in overrides {
        let base = uniforms.get(name).ok_or_else(|| {
            GraphError::Override(format!(
                "Component \"{}\" pass \"{}\" has no uniform \"{}\" to override.",
                instance_id, pass_id, name
            ))
        })?;
        if let Some(ty) = over.ty {
            if ty != base.ty {
                return Err(GraphError::Override(format!(
                    "Component \"{}\" pass \"{}\" uniform \"{}\" override type \"{}\" does not match \"{}\".",
                    instance_id, pass_id, name, ty, base.ty
                )));
            }
        }
        if let Some(value) = &over.value {
            if !value.matches(base.ty) {
                return Err(GraphError::Override(format!(
                    "Component \"{}\" pass \"{}\" uniform \"{}\" override value does not match type \"{}\".",
                    instance_id, pass_id, name, base.ty
                )));
            }
        }
        let ui = match (&base.ui, &over.ui) {
            (Some(base_ui), Some(over_ui)) => Some(base_ui.merged(over_ui)),
            (None, Some(over_ui)) => Some(UniformUi::default().merged(over_ui)),
            (ui, None) => ui.clone(),
        };
        let merged = UniformSpec {
            ty: base.ty,
            value: over.value.clone().unwrap_or_else(|| base.value.clone()),
            min: over.min.or(base.min),
            max: over.max.or(base.max),
            step: over.step.or(base.step),
            ui,
        };
        merged.validate(&format!("{}.{}.{}", instance_id, pass_id, name))?;
        next.insert(name.clone(), merged);
    }
    Ok(next)
}
