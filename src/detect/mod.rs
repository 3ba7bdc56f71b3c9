mod source;
mod stub;

pub mod remote;

pub use source::{Detection, DetectionCadence, DetectionSource};
pub use stub::{BlobSource, ScriptedSource};
