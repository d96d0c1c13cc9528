//! Content-addressed hierarchical namespace, aliasing, dependency closure,
//! and atomic draft-to-published promotion (§4.4).

pub mod draft;
pub mod path;
pub mod store;

pub use draft::DraftWriter;
pub use path::SafePath;
pub use store::{Skill, SkillMetadata, SkillStatus, SkillStore};
