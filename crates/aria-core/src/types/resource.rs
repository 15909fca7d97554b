//! Audio resource locators.

use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::format::FileFormat;

/// Where an audio handle reads its container data from.
#[derive(Debug, Clone)]
pub enum Resource {
    /// A file on disk; the container format is resolved from the extension.
    File(PathBuf),
    /// An in-memory buffer with a declared container format.
    Memory {
        /// Raw container bytes.
        data: Bytes,
        /// Declared container format.
        format: FileFormat,
    },
}

impl Resource {
    /// Build a file resource from anything path-like.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Build an in-memory resource.
    pub fn memory(data: impl Into<Bytes>, format: FileFormat) -> Self {
        Self::Memory {
            data: data.into(),
            format,
        }
    }

    /// Resolve the declared container format of the resource.
    ///
    /// Fails with [`Error::UnsupportedFormat`] when a file's extension is
    /// missing or maps to no supported format.
    pub fn file_format(&self) -> Result<FileFormat> {
        match self {
            Self::File(path) => {
                let name = path.to_string_lossy();
                FileFormat::from_name(&name)
                    .ok_or_else(|| Error::UnsupportedFormat(name.into_owned()))
            }
            Self::Memory { format, .. } => Ok(*format),
        }
    }

    /// A human-readable description of the resource for logging.
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory { data, format } => {
                format!("<memory: {} bytes, {format:?}>", data.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_resolution() {
        let resource = Resource::file("some/track.ogg");
        assert_eq!(resource.file_format().ok(), Some(FileFormat::Ogg));

        let resource = Resource::file("some/track.doc");
        assert!(matches!(
            resource.file_format(),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_memory_format_is_declared() {
        let resource = Resource::memory(vec![0u8; 4], FileFormat::Wav);
        assert_eq!(resource.file_format().ok(), Some(FileFormat::Wav));
    }
}
