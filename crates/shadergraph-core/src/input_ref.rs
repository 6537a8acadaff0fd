//! Parsed form of the `source` strings passes use to name their inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GraphError;

pub const PREV_PREFIX: &str = "$prev.";
pub const ASSET_PREFIX: &str = "$asset.";
pub const INPUT_PREFIX: &str = "$input.";

/// `"<passId>.<outputName>"`. Pass ids may themselves contain dots
/// (namespaced component passes), so the split is at the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub pass: String,
    pub output: String,
}

impl OutputRef {
    pub fn new(pass: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            pass: pass.into(),
            output: output.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, GraphError> {
        match s.rfind('.') {
            Some(idx) if idx > 0 && idx < s.len() - 1 && !s.starts_with('$') => {
                Ok(Self::new(&s[..idx], &s[idx + 1..]))
            }
            _ => Err(GraphError::Schema(format!(
                "Invalid output ref \"{}\". Use \"passId.outputName\".",
                s
            ))),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pass, self.output)
    }
}

impl FromStr for OutputRef {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A classified input source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputRef {
    /// Output of another pass produced earlier this frame.
    Output(OutputRef),
    /// Previous frame's content of a persistent output on the same pass.
    Prev { output: String },
    /// Externally owned texture.
    Asset { name: String },
    /// Component template input, replaced at instantiation.
    TemplateInput { name: String },
}

impl InputRef {
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        let prefixed = |prefix: &str, what: &str| -> Result<String, GraphError> {
            let name = &s[prefix.len()..];
            if name.is_empty() {
                return Err(GraphError::Schema(format!(
                    "\"{}\" must specify {} name after \"{}\".",
                    s, what, prefix
                )));
            }
            Ok(name.to_string())
        };
        if s.starts_with(PREV_PREFIX) {
            Ok(Self::Prev {
                output: prefixed(PREV_PREFIX, "an output")?,
            })
        } else if s.starts_with(ASSET_PREFIX) {
            Ok(Self::Asset {
                name: prefixed(ASSET_PREFIX, "an asset")?,
            })
        } else if s.starts_with(INPUT_PREFIX) {
            Ok(Self::TemplateInput {
                name: prefixed(INPUT_PREFIX, "an input")?,
            })
        } else {
            OutputRef::parse(s).map(Self::Output)
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Output(_) => "output",
            Self::Prev { .. } => "$prev",
            Self::Asset { .. } => "$asset",
            Self::TemplateInput { .. } => "$input",
        }
    }

    pub fn as_output(&self) -> Option<&OutputRef> {
        match self {
            Self::Output(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(r) => write!(f, "{}", r),
            Self::Prev { output } => write!(f, "{}{}", PREV_PREFIX, output),
            Self::Asset { name } => write!(f, "{}{}", ASSET_PREFIX, name),
            Self::TemplateInput { name } => write!(f, "{}{}", INPUT_PREFIX, name),
        }
    }
}

impl FromStr for InputRef {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Serde: both refs travel as plain strings
// ---------------------------------------------------------------------------

impl Serialize for OutputRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OutputRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OutputRef::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for InputRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InputRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InputRef::parse(&s).map_err(serde::de::Error::custom)
    }
}
