//! Pass, uniform and component definitions as they appear in a project
//! document (after shader text has been inlined).

use std::fmt;

use linked_hash_map::LinkedHashMap;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::input_ref::InputRef;
use crate::texture::{SizeSpec, TextureContract, TextureDesc};

/// Declaration-ordered string map. Input order decides texture units and
/// the default input for `Input` sizing; output order decides attachments.
pub type OrderedMap<V> = LinkedHashMap<String, V>;

// ---------------------------------------------------------------------------
// Uniforms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformType {
    F1,
    F2,
    F3,
    F4,
}

impl UniformType {
    pub const ALL: [&'static str; 4] = ["f1", "f2", "f3", "f4"];

    pub fn arity(&self) -> usize {
        match self {
            Self::F1 => 1,
            Self::F2 => 2,
            Self::F3 => 3,
            Self::F4 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::F1 => "f1",
            Self::F2 => "f2",
            Self::F3 => "f3",
            Self::F4 => "f4",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "f1" => Some(Self::F1),
            "f2" => Some(Self::F2),
            "f3" => Some(Self::F3),
            "f4" => Some(Self::F4),
            _ => None,
        }
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A number (`f1`) or a 2..4 tuple (`f2`..`f4`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformValue {
    Scalar(f32),
    Vector(Vec<f32>),
}

impl UniformValue {
    pub fn as_slice(&self) -> &[f32] {
        match self {
            Self::Scalar(v) => std::slice::from_ref(v),
            Self::Vector(v) => v,
        }
    }

    pub fn arity(&self) -> usize {
        self.as_slice().len()
    }

    /// `f1` takes a bare number; vector types take a tuple of their arity.
    pub fn matches(&self, ty: UniformType) -> bool {
        match (ty, self) {
            (UniformType::F1, Self::Scalar(_)) => true,
            (UniformType::F1, Self::Vector(_)) | (_, Self::Scalar(_)) => false,
            (ty, Self::Vector(v)) => v.len() == ty.arity(),
        }
    }

    /// The uniform type this value would imply on its own.
    pub fn implied_type(&self) -> Option<UniformType> {
        match self {
            Self::Scalar(_) => Some(UniformType::F1),
            Self::Vector(v) => match v.len() {
                2 => Some(UniformType::F2),
                3 => Some(UniformType::F3),
                4 => Some(UniformType::F4),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformUi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl UniformUi {
    pub fn hidden() -> Self {
        Self {
            show: Some(false),
            ..Default::default()
        }
    }

    /// Fields set on `other` win.
    pub fn merged(&self, other: &UniformUi) -> Self {
        Self {
            show: other.show.or(self.show),
            label: other.label.clone().or_else(|| self.label.clone()),
            group: other.group.clone().or_else(|| self.group.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformSpec {
    #[serde(rename = "type")]
    pub ty: UniformType,
    pub value: UniformValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UniformUi>,
}

impl UniformSpec {
    pub fn new(ty: UniformType, value: UniformValue) -> Self {
        Self {
            ty,
            value,
            min: None,
            max: None,
            step: None,
            ui: None,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.ui.as_ref().and_then(|ui| ui.show) != Some(false)
    }

    pub fn validate(&self, label: &str) -> Result<(), GraphError> {
        if !self.value.matches(self.ty) {
            return Err(GraphError::Schema(match self.ty {
                UniformType::F1 => format!("{}.value must be a number.", label),
                ty => format!("{}.value must be a number[{}].", label, ty.arity()),
            }));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(GraphError::Schema(format!("{} min must be <= max.", label)));
            }
        }
        Ok(())
    }
}

/// Per-instance change to a component uniform. `ty`, when present, must
/// agree with the declared type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformOverride {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<UniformType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<UniformValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UniformUi>,
}

/// `passId -> uniformName -> override`
pub type UniformOverrides = OrderedMap<OrderedMap<UniformOverride>>;

// ---------------------------------------------------------------------------
// Inputs and passes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub source: InputRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<TextureContract>,
}

impl InputSpec {
    pub fn new(source: InputRef) -> Self {
        Self {
            source,
            uniform: None,
            expected: None,
        }
    }

    /// Sampler uniform name; defaults to the input key.
    pub fn uniform_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.uniform.as_deref().unwrap_or(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassDef {
    pub id: String,
    pub fragment: String,
    #[serde(default, skip_serializing_if = "LinkedHashMap::is_empty")]
    pub inputs: OrderedMap<InputSpec>,
    #[serde(default, skip_serializing_if = "LinkedHashMap::is_empty")]
    pub outputs: OrderedMap<TextureDesc>,
    #[serde(default, skip_serializing_if = "LinkedHashMap::is_empty")]
    pub uniforms: OrderedMap<UniformSpec>,
}

impl PassDef {
    pub fn new(id: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fragment: fragment.into(),
            inputs: OrderedMap::new(),
            outputs: OrderedMap::new(),
            uniforms: OrderedMap::new(),
        }
    }

    pub fn with_input(mut self, key: &str, source: &str) -> Result<Self, GraphError> {
        self.inputs.insert(key.to_string(), InputSpec::new(InputRef::parse(source)?));
        Ok(self)
    }

    pub fn with_output(mut self, name: &str, desc: TextureDesc) -> Self {
        self.outputs.insert(name.to_string(), desc);
        self
    }

    pub fn with_uniform(mut self, name: &str, spec: UniformSpec) -> Self {
        self.uniforms.insert(name.to_string(), spec);
        self
    }

    pub fn first_input(&self) -> Option<&str> {
        self.inputs.keys().next().map(String::as_str)
    }

    /// Every `Input`-sized output must name an input of this pass, with a
    /// positive scale.
    pub fn validate_input_sizing(&self) -> Result<(), GraphError> {
        for (name, desc) in &self.outputs {
            if let SizeSpec::Input { input, scale } = &desc.size {
                let key = match input.as_deref().or(self.first_input()) {
                    Some(key) => key,
                    None => {
                        return Err(GraphError::Schema(format!(
                            "Pass \"{}\" output \"{}\" is input-sized but the pass has no inputs.",
                            self.id, name
                        )))
                    }
                };
                if !self.inputs.contains_key(key) {
                    return Err(GraphError::Schema(format!(
                        "Pass \"{}\" output \"{}\" is sized from unknown input \"{}\".",
                        self.id, name, key
                    )));
                }
                if scale.is_some_and(|s| s <= 0.0) {
                    return Err(GraphError::Schema(format!(
                        "Pass \"{}\" output \"{}\" input scale must be greater than 0.",
                        self.id, name
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOutput {
    #[serde(rename = "ref")]
    pub source: InputRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<TextureContract>,
}

/// Reusable pass template with declared external inputs and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub passes: Vec<PassDef>,
    #[serde(default)]
    pub inputs: OrderedMap<TextureContract>,
    #[serde(default)]
    pub outputs: OrderedMap<ComponentOutput>,
}

/// Presentation metadata for a parameter group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureFormat;

    #[test]
    fn test_uniform_arity_checks() {
        let ok = UniformSpec::new(UniformType::F3, UniformValue::Vector(vec![1.0, 0.5, 0.0]));
        assert!(ok.validate("u").is_ok());
        let bad = UniformSpec::new(UniformType::F2, UniformValue::Vector(vec![1.0, 0.5, 0.0]));
        assert!(bad.validate("u").is_err());
        let scalar_as_vec = UniformSpec::new(UniformType::F1, UniformValue::Vector(vec![1.0]));
        assert!(scalar_as_vec.validate("u").is_err());
    }

    #[test]
    fn test_uniform_min_max_order() {
        let mut spec = UniformSpec::new(UniformType::F1, UniformValue::Scalar(0.5));
        spec.min = Some(1.0);
        spec.max = Some(0.0);
        assert!(spec.validate("u").is_err());
    }

    #[test]
    fn test_pass_keeps_declaration_order() {
        let json = r#"{
            "id": "mix",
            "fragment": "void main() {}",
            "inputs": {
                "zeta": { "source": "a.out" },
                "alpha": { "source": "b.out", "uniform": "uAlpha" }
            },
            "outputs": { "out": { "format": "rgba8", "size": { "kind": "full" } } },
            "uniforms": { "uGain": { "type": "f1", "value": 2.0, "ui": { "show": false } } }
        }"#;
        let pass: PassDef = serde_json::from_str(json).unwrap();
        let keys: Vec<&str> = pass.inputs.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
        assert_eq!(pass.first_input(), Some("zeta"));
        assert_eq!(pass.inputs["alpha"].uniform_name("alpha"), "uAlpha");
        assert_eq!(pass.outputs["out"].format, TextureFormat::Rgba8);
        assert!(!pass.uniforms["uGain"].is_visible());
    }

    #[test]
    fn test_input_sizing_requires_existing_input() {
        let pass = PassDef::new("p", "")
            .with_output(
                "out",
                TextureDesc::new(
                    TextureFormat::Rgba8,
                    SizeSpec::Input { input: Some("missing".into()), scale: None },
                ),
            );
        assert!(matches!(pass.validate_input_sizing(), Err(GraphError::Schema(_))));

        let pass = PassDef::new("p", "")
            .with_input("src", "a.out")
            .unwrap()
            .with_output(
                "out",
                TextureDesc::new(TextureFormat::Rgba8, SizeSpec::Input { input: None, scale: Some(0.5) }),
            );
        assert!(pass.validate_input_sizing().is_ok());
    }

    #[test]
    fn test_ui_merge_prefers_override() {
        let base = UniformUi {
            show: Some(true),
            label: Some("Gain".into()),
            group: None,
        };
        let merged = base.merged(&UniformUi {
            group: Some("fx".into()),
            ..Default::default()
        });
        assert_eq!(merged.label.as_deref(), Some("Gain"));
        assert_eq!(merged.group.as_deref(), Some("fx"));
        assert_eq!(merged.show, Some(true));
    }
}
