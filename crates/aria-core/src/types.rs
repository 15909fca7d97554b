//! Core domain types for aria.

pub mod event;
pub mod format;
pub mod pcm;
pub mod resource;

pub use event::{AudioEvent, AudioEventKind, EventValue};
pub use format::{FileFormat, FormatCapability};
pub use pcm::PcmSpec;
pub use resource::Resource;
