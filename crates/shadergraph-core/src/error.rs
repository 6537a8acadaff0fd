use std::fmt;

/// Build-time failures: malformed documents, dangling references, contract
/// mismatches and cycles. All of these are fatal to loading or building.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Malformed or incomplete document (wrong type, bad enum, range).
    Schema(String),
    /// Unknown pass, output, component, asset or shader name.
    Reference(String),
    /// A component input without a caller-supplied binding.
    MissingBinding { component: String, input: String },
    /// Invalid per-instance uniform override.
    Override(String),
    /// Declared expectation not satisfied by the upstream descriptor.
    Contract {
        label: String,
        expected: String,
        actual: String,
    },
    /// Pass dependency cycle (or self-loop).
    Cycle(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(msg) => write!(f, "Schema error: {}", msg),
            Self::Reference(msg) => write!(f, "Reference error: {}", msg),
            Self::MissingBinding { component, input } => write!(
                f,
                "Component \"{}\" is missing binding for input \"{}\"",
                component, input
            ),
            Self::Override(msg) => write!(f, "Uniform override error: {}", msg),
            Self::Contract {
                label,
                expected,
                actual,
            } => write!(
                f,
                "Contract mismatch for {}: expected {}, got {}",
                label, expected, actual
            ),
            Self::Cycle(msg) => write!(f, "Graph cycle: {}", msg),
        }
    }
}

impl std::error::Error for GraphError {}
