//! Structural validation of a project document after include resolution.
//!
//! Runs over raw JSON so every problem is reported with its document path
//! (`project.graphs.main.passes[2].outputs.color.size`) rather than as a
//! serde error.

use std::collections::HashSet;

use serde_json::{Map, Value};
use shadergraph_core::{
    GraphError, TextureFilter, TextureFormat, UniformType, ASSET_PREFIX, INPUT_PREFIX, PREV_PREFIX,
};

pub const SHADER_REF_PREFIX: &str = "shader.";
pub const INCLUDE_KEY: &str = "$include";
pub const REF_KEY: &str = "$ref";

type Result<T> = std::result::Result<T, GraphError>;

fn schema(message: String) -> GraphError {
    GraphError::Schema(message)
}

// ---------------------------------------------------------------------------
// Primitive assertions
// ---------------------------------------------------------------------------

fn object<'a>(value: &'a Value, label: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| schema(format!("{} must be an object.", label)))
}

fn string<'a>(value: Option<&'a Value>, label: &str) -> Result<&'a str> {
    match value.and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(schema(format!("{} must be a non-empty string.", label))),
    }
}

fn non_empty(value: Option<&Value>, label: &str) -> Result<()> {
    string(value, label).map(|_| ())
}

fn number(value: Option<&Value>, label: &str) -> Result<f64> {
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| schema(format!("{} must be a number.", label)))
}

fn boolean(value: Option<&Value>, label: &str) -> Result<bool> {
    value
        .and_then(Value::as_bool)
        .ok_or_else(|| schema(format!("{} must be a boolean.", label)))
}

/// Present and not `null`.
fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn optional<T>(
    obj: &Map<String, Value>,
    key: &str,
    label: &str,
    check: impl Fn(Option<&Value>, &str) -> Result<T>,
) -> Result<Option<T>> {
    match field(obj, key) {
        Some(v) => check(Some(v), &format!("{}.{}", label, key)).map(Some),
        None => Ok(None),
    }
}

pub fn is_include(value: &Value) -> bool {
    value.get(INCLUDE_KEY).is_some_and(Value::is_string)
}

pub fn is_ref(value: &Value) -> bool {
    value.get(REF_KEY).is_some_and(Value::is_string)
}

// ---------------------------------------------------------------------------
// Textures and uniforms
// ---------------------------------------------------------------------------

fn texture_format(value: Option<&Value>, label: &str) -> Result<()> {
    let format = string(value, label)?;
    if TextureFormat::from_str(format).is_none() {
        return Err(schema(format!(
            "{} must be one of {}.",
            label,
            TextureFormat::ALL.join(", ")
        )));
    }
    Ok(())
}

fn texture_filter(value: Option<&Value>, label: &str) -> Result<()> {
    let filter = string(value, label)?;
    if TextureFilter::from_str(filter).is_none() {
        return Err(schema(format!(
            "{} must be one of {}.",
            label,
            TextureFilter::ALL.join(", ")
        )));
    }
    Ok(())
}

fn positive(value: f64, label: &str) -> Result<()> {
    if value <= 0.0 {
        return Err(schema(format!("{} must be greater than 0.", label)));
    }
    Ok(())
}

fn positive_integer(value: Option<&Value>, label: &str) -> Result<()> {
    let n = number(value, label)?;
    if n <= 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(schema(format!("{} must be a positive integer.", label)));
    }
    Ok(())
}

fn size_spec(value: Option<&Value>, label: &str) -> Result<()> {
    let size = object(value.unwrap_or(&Value::Null), label)?;
    let kind = string(size.get("kind"), &format!("{}.kind", label))?;
    match kind {
        "full" | "half" => Ok(()),
        "scale" => positive(number(size.get("scale"), &format!("{}.scale", label))?, &format!("{}.scale", label)),
        "custom" => {
            positive_integer(size.get("width"), &format!("{}.width", label))?;
            positive_integer(size.get("height"), &format!("{}.height", label))
        }
        "input" => {
            optional(size, "input", label, non_empty)?;
            if let Some(scale) = optional(size, "scale", label, number)? {
                positive(scale, &format!("{}.scale", label))?;
            }
            Ok(())
        }
        _ => Err(schema(format!(
            "{}.kind must be one of full, half, scale, custom, input.",
            label
        ))),
    }
}

fn texture_desc(value: &Value, label: &str) -> Result<()> {
    let desc = object(value, label)?;
    texture_format(desc.get("format"), &format!("{}.format", label))?;
    size_spec(desc.get("size"), &format!("{}.size", label))?;
    optional(desc, "filter", label, texture_filter)?;
    optional(desc, "persistent", label, boolean)?;
    Ok(())
}

fn texture_contract(value: &Value, label: &str) -> Result<()> {
    let contract = object(value, label)?;
    optional(contract, "format", label, texture_format)?;
    optional(contract, "size", label, size_spec)?;
    optional(contract, "filter", label, texture_filter)?;
    Ok(())
}

fn uniform_type(value: Option<&Value>, label: &str) -> Result<UniformType> {
    let ty = string(value, label)?;
    UniformType::from_str(ty).ok_or_else(|| {
        schema(format!("{} must be one of {}.", label, UniformType::ALL.join(", ")))
    })
}

fn uniform_ui(obj: &Map<String, Value>, label: &str) -> Result<()> {
    if let Some(ui) = field(obj, "ui") {
        let label = format!("{}.ui", label);
        let ui = object(ui, &label)?;
        optional(ui, "show", &label, boolean)?;
        optional(ui, "label", &label, non_empty)?;
        optional(ui, "group", &label, non_empty)?;
    }
    Ok(())
}

fn number_array(value: &Value, len: usize, label: &str) -> Result<()> {
    match value.as_array() {
        Some(items) if items.len() == len => {
            for (i, item) in items.iter().enumerate() {
                number(Some(item), &format!("{}[{}]", label, i))?;
            }
            Ok(())
        }
        _ => Err(schema(format!("{} must be a number[{}].", label, len))),
    }
}

fn uniform_spec(value: &Value, label: &str) -> Result<()> {
    let spec = object(value, label)?;
    let ty = uniform_type(spec.get("type"), &format!("{}.type", label))?;
    let value_label = format!("{}.value", label);
    match ty {
        UniformType::F1 => {
            number(spec.get("value"), &value_label)?;
        }
        ty => number_array(spec.get("value").unwrap_or(&Value::Null), ty.arity(), &value_label)?,
    }
    let min = optional(spec, "min", label, number)?;
    let max = optional(spec, "max", label, number)?;
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(schema(format!("{} min must be <= max.", label)));
        }
    }
    optional(spec, "step", label, number)?;
    uniform_ui(spec, label)
}

fn uniform_override(value: &Value, label: &str) -> Result<()> {
    let spec = object(value, label)?;
    if field(spec, "type").is_some() {
        uniform_type(spec.get("type"), &format!("{}.type", label))?;
    }
    if let Some(v) = field(spec, "value") {
        let value_label = format!("{}.value", label);
        match v {
            Value::Number(_) => {}
            Value::Array(items) if (2..=4).contains(&items.len()) => {
                for (i, item) in items.iter().enumerate() {
                    number(Some(item), &format!("{}[{}]", value_label, i))?;
                }
            }
            Value::Array(_) => return Err(schema(format!("{} must be a number[2..4].", value_label))),
            _ => {
                return Err(schema(format!(
                    "{} must be a number or array of numbers.",
                    value_label
                )))
            }
        }
    }
    optional(spec, "min", label, number)?;
    optional(spec, "max", label, number)?;
    optional(spec, "step", label, number)?;
    uniform_ui(spec, label)
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SourceRules {
    template_inputs: bool,
    dotted_pass_ids: bool,
    assets: bool,
    prev: bool,
}

const PASS_INPUT_IN_COMPONENT: SourceRules = SourceRules {
    template_inputs: true,
    dotted_pass_ids: false,
    assets: true,
    prev: true,
};

const PASS_INPUT_IN_GRAPH: SourceRules = SourceRules {
    template_inputs: false,
    dotted_pass_ids: true,
    assets: true,
    prev: true,
};

const COMPONENT_OUTPUT: SourceRules = SourceRules {
    template_inputs: true,
    dotted_pass_ids: false,
    assets: false,
    prev: false,
};

const GRAPH_OUTPUT: SourceRules = SourceRules {
    template_inputs: false,
    dotted_pass_ids: true,
    assets: false,
    prev: false,
};

fn input_source(source: &str, label: &str, rules: SourceRules) -> Result<()> {
    let prefixes = [
        (INPUT_PREFIX, rules.template_inputs, "an input"),
        (PREV_PREFIX, rules.prev, "an output"),
        (ASSET_PREFIX, rules.assets, "an asset"),
    ];
    for (prefix, allowed, what) in prefixes {
        if let Some(name) = source.strip_prefix(prefix) {
            if !allowed {
                return Err(schema(format!(
                    "{} does not allow \"{}*\" references.",
                    label, prefix
                )));
            }
            if name.is_empty() {
                return Err(schema(format!(
                    "{} must specify {} name after \"{}\".",
                    label, what, prefix
                )));
            }
            return Ok(());
        }
    }
    match source.rfind('.') {
        Some(idx) if idx > 0 && idx < source.len() - 1 => {}
        _ => return Err(schema(format!("{} must be \"pass.output\".", label))),
    }
    if !rules.dotted_pass_ids && source.split('.').count() != 2 {
        return Err(schema(format!(
            "{} must reference a local pass output (\"pass.output\").",
            label
        )));
    }
    Ok(())
}

fn input_spec(value: &Value, label: &str, rules: SourceRules) -> Result<()> {
    let input = object(value, label)?;
    let source_label = format!("{}.source", label);
    let source = string(input.get("source"), &source_label)?;
    input_source(source, &source_label, rules)?;
    optional(input, "uniform", label, non_empty)?;
    if let Some(expected) = field(input, "expected") {
        texture_contract(expected, &format!("{}.expected", label))?;
    }
    Ok(())
}

fn shader_ref(value: &Value, label: &str) -> Result<()> {
    let ref_label = format!("{}.{}", label, REF_KEY);
    let target = string(value.get(REF_KEY), &ref_label)?;
    if !target.starts_with(SHADER_REF_PREFIX) {
        return Err(schema(format!("{} must use \"shader.<name>\".", ref_label)));
    }
    Ok(())
}

/// A string body or `{ "$ref": "shader.<name>" }`.
fn fragment_source(value: Option<&Value>, label: &str) -> Result<()> {
    match value {
        Some(Value::String(text)) if text.trim().is_empty() => {
            Err(schema(format!("{} must not be empty.", label)))
        }
        Some(Value::String(_)) => Ok(()),
        Some(v) if is_ref(v) => shader_ref(v, label),
        Some(v) if is_include(v) => Err(schema(format!("{} includes were not resolved.", label))),
        _ => Err(schema(format!(
            "{} must be a string or {{ \"$ref\": \"shader.<name>\" }}.",
            label
        ))),
    }
}

// ---------------------------------------------------------------------------
// Passes and components
// ---------------------------------------------------------------------------

fn pass_source(value: &Value, label: &str, rules: SourceRules) -> Result<()> {
    let pass = object(value, label)?;
    let id = string(pass.get("id"), &format!("{}.id", label))?;
    if !rules.dotted_pass_ids && id.contains('.') {
        return Err(schema(format!("{}.id must not include \".\".", label)));
    }
    fragment_source(pass.get("fragment"), &format!("{}.fragment", label))?;

    if let Some(inputs) = field(pass, "inputs") {
        let inputs_label = format!("{}.inputs", label);
        for (key, input) in object(inputs, &inputs_label)? {
            input_spec(input, &format!("{}.{}", inputs_label, key), rules)?;
        }
    }
    if let Some(outputs) = field(pass, "outputs") {
        let outputs_label = format!("{}.outputs", label);
        for (key, output) in object(outputs, &outputs_label)? {
            texture_desc(output, &format!("{}.{}", outputs_label, key))?;
        }
    }
    if let Some(uniforms) = field(pass, "uniforms") {
        let uniforms_label = format!("{}.uniforms", label);
        for (key, uniform) in object(uniforms, &uniforms_label)? {
            uniform_spec(uniform, &format!("{}.{}", uniforms_label, key))?;
        }
    }
    Ok(())
}

fn pass_list(value: &Value, label: &str, rules: SourceRules) -> Result<()> {
    let passes = value
        .as_array()
        .ok_or_else(|| schema(format!("{}.passes must be an array.", label)))?;
    let mut ids = HashSet::new();
    for (i, pass) in passes.iter().enumerate() {
        pass_source(pass, &format!("{}.passes[{}]", label, i), rules)?;
        if let Some(id) = pass.get("id").and_then(Value::as_str) {
            if !ids.insert(id) {
                return Err(schema(format!("{} has duplicate pass id \"{}\".", label, id)));
            }
        }
    }
    Ok(())
}

fn component_spec(value: &Value, label: &str) -> Result<()> {
    if is_include(value) {
        return Err(schema(format!("{} includes were not resolved.", label)));
    }
    let spec = object(value, label)?;
    string(spec.get("name"), &format!("{}.name", label))?;

    let inputs_label = format!("{}.inputs", label);
    for (key, contract) in object(spec.get("inputs").unwrap_or(&Value::Null), &inputs_label)? {
        texture_contract(contract, &format!("{}.{}", inputs_label, key))?;
    }
    let outputs_label = format!("{}.outputs", label);
    for (key, output) in object(spec.get("outputs").unwrap_or(&Value::Null), &outputs_label)? {
        let output_label = format!("{}.{}", outputs_label, key);
        let output = object(output, &output_label)?;
        let ref_label = format!("{}.ref", output_label);
        input_source(string(output.get("ref"), &ref_label)?, &ref_label, COMPONENT_OUTPUT)?;
        if let Some(contract) = field(output, "contract") {
            texture_contract(contract, &format!("{}.contract", output_label))?;
        }
    }
    pass_list(spec.get("passes").unwrap_or(&Value::Null), label, PASS_INPUT_IN_COMPONENT)
}

fn component_instance(value: &Value, label: &str) -> Result<()> {
    let instance = object(value, label)?;
    string(instance.get("id"), &format!("{}.id", label))?;
    string(instance.get("component"), &format!("{}.component", label))?;
    let bindings_label = format!("{}.bindings", label);
    for (key, binding) in object(instance.get("bindings").unwrap_or(&Value::Null), &bindings_label)? {
        string(Some(binding), &format!("{}.{}", bindings_label, key))?;
    }
    if let Some(overrides) = field(instance, "uniforms") {
        let overrides_label = format!("{}.uniforms", label);
        for (pass_id, uniforms) in object(overrides, &overrides_label)? {
            let pass_label = format!("{}.{}", overrides_label, pass_id);
            for (name, uniform) in object(uniforms, &pass_label)? {
                uniform_override(uniform, &format!("{}.{}", pass_label, name))?;
            }
        }
    }
    Ok(())
}

fn asset_spec(value: &Value, label: &str) -> Result<()> {
    let asset = object(value, label)?;
    let kind = string(asset.get("type"), &format!("{}.type", label))?;
    if kind != "image" && kind != "video" {
        return Err(schema(format!("{}.type must be \"image\" or \"video\".", label)));
    }
    string(asset.get("url"), &format!("{}.url", label))?;
    optional(asset, "filter", label, texture_filter)?;
    for flag in ["flipY", "loop", "muted", "autoplay", "playsInline"] {
        optional(asset, flag, label, boolean)?;
    }
    if let Some(lut) = optional(asset, "lutSize", label, number)? {
        positive(lut, &format!("{}.lutSize", label))?;
    }
    Ok(())
}

fn shader_map(value: &Value, label: &str) -> Result<()> {
    for (key, shader) in object(value, label)? {
        fragment_source(Some(shader), &format!("{}.{}", label, key))?;
    }
    Ok(())
}

fn ui_groups(value: &Value, label: &str) -> Result<()> {
    for (name, group) in object(value, label)? {
        let group_label = format!("{}.{}", label, name);
        let group = object(group, &group_label)?;
        optional(group, "label", &group_label, non_empty)?;
        optional(group, "order", &group_label, number)?;
        optional(group, "collapsed", &group_label, boolean)?;
    }
    Ok(())
}

fn graph(value: &Value, label: &str) -> Result<()> {
    let graph = object(value, label)?;
    let output_label = format!("{}.output", label);
    input_source(string(graph.get("output"), &output_label)?, &output_label, GRAPH_OUTPUT)?;
    if let Some(passes) = field(graph, "passes") {
        pass_list(passes, label, PASS_INPUT_IN_GRAPH)?;
    }
    if let Some(components) = field(graph, "components") {
        let components = components
            .as_array()
            .ok_or_else(|| schema(format!("{}.components must be an array.", label)))?;
        for (i, instance) in components.iter().enumerate() {
            component_instance(instance, &format!("{}.components[{}]", label, i))?;
        }
    }
    if let Some(groups) = field(graph, "uiGroups") {
        ui_groups(groups, &format!("{}.uiGroups", label))?;
    }
    optional(graph, "timeOffset", label, number)?;
    Ok(())
}

/// Validates a fully include-resolved project document.
pub fn validate_project(document: &Value) -> Result<()> {
    let project = object(document, "project")?;
    if let Some(shaders) = field(project, "shaders") {
        shader_map(shaders, "project.shaders")?;
    }
    if let Some(assets) = field(project, "assets") {
        for (key, asset) in object(assets, "project.assets")? {
            asset_spec(asset, &format!("project.assets.{}", key))?;
        }
    }
    if let Some(components) = field(project, "components") {
        for (key, component) in object(components, "project.components")? {
            component_spec(component, &format!("project.components.{}", key))?;
        }
    }
    let graphs = object(project.get("graphs").unwrap_or(&Value::Null), "project.graphs")?;
    if graphs.is_empty() {
        return Err(schema("project.graphs must define at least one graph.".to_string()));
    }
    for (key, value) in graphs {
        graph(value, &format!("project.graphs.{}", key))?;
    }
    Ok(())
}
