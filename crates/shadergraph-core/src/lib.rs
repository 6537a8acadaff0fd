//! shadergraph core: the declarative pass model, component instantiation
//! and the graph builder that turns both into a sorted execution plan.

pub mod component;
pub mod error;
pub mod graph;
pub mod input_ref;
pub mod pass;
pub mod texture;

pub use component::{instantiate, ComponentInstance};
pub use error::GraphError;
pub use graph::{
    build, Graph, GraphBuilder, ParameterGroup, ParameterRef, PassNode, ResolvedInput,
    ResolvedSource,
};
pub use input_ref::{InputRef, OutputRef, ASSET_PREFIX, INPUT_PREFIX, PREV_PREFIX};
pub use pass::{
    ComponentOutput, ComponentSpec, InputSpec, OrderedMap, PassDef, UiGroup, UniformOverride,
    UniformOverrides, UniformSpec, UniformType, UniformUi, UniformValue,
};
pub use texture::{
    Extent, SizeError, SizeSpec, TextureContract, TextureDesc, TextureFilter, TextureFormat,
    SCALE_EPSILON,
};
