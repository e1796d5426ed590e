//! # Learned Modules
//!
//! Parameterized modules built from a caller-supplied [`candle_nn::VarBuilder`].
//!
//! ## Key Components
//!
//! - [`outer_product_mean`] - Pair update from the MSA embedding, with chunked evaluation and
//!   optional in-place normalization
//! - [`structure_module`] - Iterative anchor refinement and frame expansion for mixed chains
//! - [`frames`] - Backbone frames, torsion-driven frame expansion and dense atom placement
//! - [`attention`], [`angle_resnet`], [`transition`] - Structure module collaborators
//! - [`config`] - Hyper-parameter structs with builders and validation
//!
//! ## Usage
//!
//! ```ignore
//! use complexfold::model::{StructureInput, StructureModule, StructureModuleConfigBuilder};
//!
//! let config = StructureModuleConfigBuilder::new()
//!     .c_s(384)
//!     .c_z(128)
//!     .c_ipa(16)
//!     .c_resnet(128)
//!     .no_heads_ipa(12)
//!     .no_qk_points(4)
//!     .no_v_points(8)
//!     .no_blocks(8)
//!     .build()?;
//! let module = StructureModule::new(&config, vb.pp("structure_module"))?;
//! let output = module.forward(&mut input, &butype, None, &partition, false)?;
//! ```

pub mod angle_resnet;
pub mod attention;
pub mod config;
pub mod error;
pub mod frames;
pub mod outer_product_mean;
pub mod primitives;
pub mod structure_module;
pub mod transition;

pub use attention::{InvariantPointAttention, SingleUpdate};
pub use config::{
    ConfigError, OuterProductMeanConfig, OuterProductMeanConfigBuilder, StructureModuleConfig,
    StructureModuleConfigBuilder,
};
pub use error::ModelError;
pub use outer_product_mean::OuterProductMean;
pub use structure_module::{StructureInput, StructureModule, StructureModuleOutput};
