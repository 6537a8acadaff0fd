//! Texture contract model: size policies, formats, filters and the
//! partial descriptors used to type-check connections between passes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Tolerance used when comparing scale factors.
pub const SCALE_EPSILON: f32 = 1e-6;

// ---------------------------------------------------------------------------
// Extent
// ---------------------------------------------------------------------------

/// Concrete pixel dimensions of a texture or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn texel_size(&self) -> [f32; 2] {
        [1.0 / self.width.max(1) as f32, 1.0 / self.height.max(1) as f32]
    }

    fn scaled(&self, scale: f32) -> Self {
        Self {
            width: ((self.width as f32 * scale).floor() as u32).max(1),
            height: ((self.height as f32 * scale).floor() as u32).max(1),
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Format / filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    Rgba8,
    Rgba16f,
}

impl TextureFormat {
    pub const ALL: [&'static str; 2] = ["rgba8", "rgba16f"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba8",
            Self::Rgba16f => "rgba16f",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rgba8" => Some(Self::Rgba8),
            "rgba16f" => Some(Self::Rgba16f),
            _ => None,
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

impl TextureFilter {
    pub const ALL: [&'static str; 2] = ["nearest", "linear"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "nearest" => Some(Self::Nearest),
            "linear" => Some(Self::Linear),
            _ => None,
        }
    }
}

impl fmt::Display for TextureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SizeSpec
// ---------------------------------------------------------------------------

/// How an output texture's dimensions are derived each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SizeSpec {
    Full,
    Half,
    Scale {
        scale: f32,
    },
    Custom {
        width: u32,
        height: u32,
    },
    Input {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<f32>,
    },
}

/// Failure to derive an input-relative size at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeError {
    /// `Input` sizing on a pass that declares no inputs.
    NoInputs,
    /// The referenced input has no resolved texture this frame.
    UnresolvedInput(String),
}

impl fmt::Display for SizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoInputs => write!(f, "input-sized output on a pass without inputs"),
            Self::UnresolvedInput(key) => write!(f, "input \"{}\" has no resolved size", key),
        }
    }
}

impl std::error::Error for SizeError {}

impl SizeSpec {
    /// Scale relative to the frame, for the frame-relative kinds.
    pub fn implied_scale(&self) -> Option<f32> {
        match self {
            Self::Full => Some(1.0),
            Self::Half => Some(0.5),
            Self::Scale { scale } => Some(*scale),
            Self::Custom { .. } | Self::Input { .. } => None,
        }
    }

    pub fn input_scale(&self) -> f32 {
        match self {
            Self::Input { scale, .. } => scale.unwrap_or(1.0),
            _ => 1.0,
        }
    }

    /// Resolve to pixels. `input_size` looks up the resolved size of an
    /// input key; `default_input` is the pass's first declared input.
    pub fn resolve<F>(
        &self,
        frame: Extent,
        default_input: Option<&str>,
        input_size: F,
    ) -> Result<Extent, SizeError>
    where
        F: Fn(&str) -> Option<Extent>,
    {
        match self {
            Self::Full => Ok(frame),
            Self::Half => Ok(Extent::new((frame.width / 2).max(1), (frame.height / 2).max(1))),
            Self::Scale { scale } => Ok(frame.scaled(*scale)),
            Self::Custom { width, height } => Ok(Extent::new((*width).max(1), (*height).max(1))),
            Self::Input { input, scale } => {
                let key = input.as_deref().or(default_input).ok_or(SizeError::NoInputs)?;
                let base = input_size(key).ok_or_else(|| SizeError::UnresolvedInput(key.to_string()))?;
                Ok(base.scaled(scale.unwrap_or(1.0)))
            }
        }
    }

    /// Checks an expected size against an actual one. `Input` sizes compare
    /// scale only; the referenced input key is not part of the check.
    pub fn is_compatible(expected: &SizeSpec, actual: &SizeSpec) -> bool {
        match (expected, actual) {
            (Self::Input { .. }, Self::Input { .. }) => {
                (expected.input_scale() - actual.input_scale()).abs() < SCALE_EPSILON
            }
            (Self::Input { .. }, _) | (_, Self::Input { .. }) => false,
            (
                Self::Custom { width: ew, height: eh },
                Self::Custom { width: aw, height: ah },
            ) => ew == aw && eh == ah,
            (Self::Custom { .. }, _) | (_, Self::Custom { .. }) => false,
            _ => match (expected.implied_scale(), actual.implied_scale()) {
                (Some(e), Some(a)) => (e - a).abs() < SCALE_EPSILON,
                _ => false,
            },
        }
    }

    pub fn validate(&self, label: &str) -> Result<(), GraphError> {
        match self {
            Self::Full | Self::Half => Ok(()),
            Self::Scale { scale } if *scale > 0.0 => Ok(()),
            Self::Scale { .. } => Err(GraphError::Schema(format!("{}.scale must be greater than 0.", label))),
            Self::Custom { width, height } if *width > 0 && *height > 0 => Ok(()),
            Self::Custom { .. } => Err(GraphError::Schema(format!(
                "{} width/height must be greater than 0.",
                label
            ))),
            Self::Input { scale: Some(s), .. } if *s <= 0.0 => {
                Err(GraphError::Schema(format!("{}.scale must be greater than 0.", label)))
            }
            Self::Input { .. } => Ok(()),
        }
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Half => write!(f, "half"),
            Self::Scale { scale } => write!(f, "scale({})", scale),
            Self::Custom { width, height } => write!(f, "custom({}x{})", width, height),
            Self::Input { input, scale } => write!(
                f,
                "input({}, {})",
                input.as_deref().unwrap_or("<first>"),
                scale.unwrap_or(1.0)
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// TextureDesc / TextureContract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureDesc {
    pub format: TextureFormat,
    pub size: SizeSpec,
    #[serde(default)]
    pub filter: TextureFilter,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub persistent: bool,
}

impl TextureDesc {
    pub fn new(format: TextureFormat, size: SizeSpec) -> Self {
        Self {
            format,
            size,
            filter: TextureFilter::default(),
            persistent: false,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl fmt::Display for TextureDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "format={} size={} filter={}", self.format, self.size, self.filter)?;
        if self.persistent {
            write!(f, " persistent")?;
        }
        Ok(())
    }
}

/// Partial descriptor asserting what a consumer expects from a texture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureContract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TextureFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<TextureFilter>,
}

impl TextureContract {
    /// Fails with a `Contract` error naming both shapes on the first
    /// mismatching field.
    pub fn check(&self, label: &str, actual: &TextureDesc) -> Result<(), GraphError> {
        if let Some(format) = self.format {
            if format != actual.format {
                return Err(GraphError::Contract {
                    label: format!("{} format", label),
                    expected: format.to_string(),
                    actual: actual.format.to_string(),
                });
            }
        }
        if let Some(filter) = self.filter {
            if filter != actual.filter {
                return Err(GraphError::Contract {
                    label: format!("{} filter", label),
                    expected: filter.to_string(),
                    actual: actual.filter.to_string(),
                });
            }
        }
        if let Some(size) = &self.size {
            if !SizeSpec::is_compatible(size, &actual.size) {
                return Err(GraphError::Contract {
                    label: format!("{} size", label),
                    expected: size.to_string(),
                    actual: actual.size.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.format.is_none() && self.size.is_none() && self.filter.is_none()
    }
}

impl fmt::Display for TextureContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(format) = self.format {
            parts.push(format!("format={}", format));
        }
        if let Some(size) = &self.size {
            parts.push(format!("size={}", size));
        }
        if let Some(filter) = self.filter {
            parts.push(format!("filter={}", filter));
        }
        if parts.is_empty() {
            write!(f, "<any>")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_inputs(_: &str) -> Option<Extent> {
        None
    }

    #[test]
    fn test_full_matches_frame() {
        let frame = Extent::new(640, 360);
        assert_eq!(SizeSpec::Full.resolve(frame, None, no_inputs).unwrap(), frame);
    }

    #[test]
    fn test_sizes_never_below_one() {
        let frame = Extent::new(1, 1);
        let specs = [
            SizeSpec::Full,
            SizeSpec::Half,
            SizeSpec::Scale { scale: 0.01 },
            SizeSpec::Custom { width: 1, height: 1 },
        ];
        for spec in &specs {
            let size = spec.resolve(frame, None, no_inputs).unwrap();
            assert!(size.width >= 1 && size.height >= 1, "{} -> {}", spec, size);
        }
    }

    #[test]
    fn test_half_floors() {
        let size = SizeSpec::Half.resolve(Extent::new(255, 101), None, no_inputs).unwrap();
        assert_eq!(size, Extent::new(127, 50));
    }

    #[test]
    fn test_input_sized_uses_default_input() {
        let spec = SizeSpec::Input { input: None, scale: Some(0.5) };
        let size = spec
            .resolve(Extent::new(800, 600), Some("src"), |key| {
                (key == "src").then(|| Extent::new(100, 40))
            })
            .unwrap();
        assert_eq!(size, Extent::new(50, 20));
    }

    #[test]
    fn test_input_sized_without_inputs_fails() {
        let spec = SizeSpec::Input { input: None, scale: None };
        assert_eq!(
            spec.resolve(Extent::new(8, 8), None, no_inputs),
            Err(SizeError::NoInputs)
        );
    }

    #[test]
    fn test_half_and_scale_half_compatible() {
        assert!(SizeSpec::is_compatible(&SizeSpec::Half, &SizeSpec::Scale { scale: 0.5 }));
        assert!(SizeSpec::is_compatible(&SizeSpec::Full, &SizeSpec::Scale { scale: 1.0 }));
        assert!(!SizeSpec::is_compatible(&SizeSpec::Full, &SizeSpec::Half));
    }

    #[test]
    fn test_custom_and_input_compatibility() {
        let a = SizeSpec::Custom { width: 64, height: 64 };
        let b = SizeSpec::Custom { width: 64, height: 32 };
        assert!(SizeSpec::is_compatible(&a, &a.clone()));
        assert!(!SizeSpec::is_compatible(&a, &b));
        assert!(!SizeSpec::is_compatible(&a, &SizeSpec::Full));

        let left = SizeSpec::Input { input: Some("a".into()), scale: None };
        let right = SizeSpec::Input { input: Some("b".into()), scale: Some(1.0) };
        assert!(SizeSpec::is_compatible(&left, &right));
        assert!(!SizeSpec::is_compatible(&left, &SizeSpec::Full));
    }

    #[test]
    fn test_contract_format_mismatch_reports_both_shapes() {
        let contract = TextureContract {
            format: Some(TextureFormat::Rgba16f),
            ..Default::default()
        };
        let actual = TextureDesc::new(TextureFormat::Rgba8, SizeSpec::Full);
        match contract.check("pass \"b\" input \"src\"", &actual) {
            Err(GraphError::Contract { expected, actual, .. }) => {
                assert_eq!(expected, "rgba16f");
                assert_eq!(actual, "rgba8");
            }
            other => panic!("expected contract error, got {:?}", other),
        }
    }

    #[test]
    fn test_contract_filter_defaults_to_linear() {
        let contract = TextureContract {
            filter: Some(TextureFilter::Linear),
            ..Default::default()
        };
        let actual = TextureDesc::new(TextureFormat::Rgba8, SizeSpec::Half);
        assert!(contract.check("x", &actual).is_ok());
        let nearest = actual.with_filter(TextureFilter::Nearest);
        assert!(contract.check("x", &nearest).is_err());
    }

    #[test]
    fn test_parse_size_spec_json() {
        let spec: SizeSpec = serde_json::from_str(r#"{"kind":"scale","scale":0.25}"#).unwrap();
        assert_eq!(spec, SizeSpec::Scale { scale: 0.25 });
        let spec: SizeSpec = serde_json::from_str(r#"{"kind":"input"}"#).unwrap();
        assert_eq!(spec, SizeSpec::Input { input: None, scale: None });
        let desc: TextureDesc =
            serde_json::from_str(r#"{"format":"rgba16f","size":{"kind":"full"}}"#).unwrap();
        assert_eq!(desc.filter, TextureFilter::Linear);
        assert!(!desc.persistent);
    }
}
