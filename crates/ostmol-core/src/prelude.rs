//! Commonly used types, for glob import.
//!
//! ```ignore
//! use ostmol::prelude::*;
//! ```

pub use crate::core::compounds::library::CompoundLibrary;
pub use crate::core::models::chain::ChainType;
pub use crate::core::models::props::{PropValue, PropertyError};
pub use crate::core::models::residue::{ChemClass, ResNum};
pub use crate::core::models::topology::BondOrder;
pub use crate::engine::config::{ConfigError, ProcessorConfig};
pub use crate::engine::coords::CoordState;
pub use crate::engine::editor::{EditMode, IcsEditor, XcsEditor};
pub use crate::engine::entity::EntityHandle;
pub use crate::engine::error::EntityError;
pub use crate::engine::handle::{AtomHandle, BondHandle, ChainHandle, PropertyOwner, ResidueHandle, TorsionHandle};
pub use crate::engine::processor::{ProcessReport, ProcessingContext, Processor, RuleBasedProcessor};
pub use crate::engine::signals::EntityEvent;
pub use crate::engine::view::{EntityView, ViewAddFlags};
pub use crate::engine::visitor::EntityVisitor;
pub use crate::query::{Query, QueryFlags};
