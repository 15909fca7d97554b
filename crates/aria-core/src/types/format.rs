//! Container file formats and their capabilities.

use serde::{Deserialize, Serialize};

/// A supported audio container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Wavesound (.wav)
    Wav,
    /// MPEG-1/2 Audio Layer III (.mp3)
    Mp3,
    /// Ogg Vorbis (.ogg, .oga)
    Ogg,
    /// Audio Interchange File Format (.aif, .aiff)
    Aiff,
    /// Compressed AIFF (.aifc)
    Aifc,
    /// Au sound file (.au)
    Au,
    /// SND sound file (.snd)
    Snd,
}

/// What the library can do with a [`FileFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatCapability {
    /// Whether the format can be opened for playback.
    pub decode: bool,
    /// Whether the format can be written by the recorder.
    pub encode: bool,
    /// File extensions associated with the format, lowercase.
    pub extensions: &'static [&'static str],
}

const WAV: FormatCapability = FormatCapability {
    decode: true,
    encode: true,
    extensions: &["wav"],
};
const MP3: FormatCapability = FormatCapability {
    decode: true,
    encode: false,
    extensions: &["mp3"],
};
const OGG: FormatCapability = FormatCapability {
    decode: true,
    encode: false,
    extensions: &["ogg", "oga"],
};
const AIFF: FormatCapability = FormatCapability {
    decode: true,
    encode: false,
    extensions: &["aif", "aiff"],
};
const AIFC: FormatCapability = FormatCapability {
    decode: true,
    encode: false,
    extensions: &["aifc"],
};
const AU: FormatCapability = FormatCapability {
    decode: true,
    encode: false,
    extensions: &["au"],
};
const SND: FormatCapability = FormatCapability {
    decode: true,
    encode: false,
    extensions: &["snd"],
};

impl FileFormat {
    /// All formats, in resolution order.
    pub const ALL: [Self; 7] = [
        Self::Wav,
        Self::Mp3,
        Self::Ogg,
        Self::Aiff,
        Self::Aifc,
        Self::Au,
        Self::Snd,
    ];

    /// The static capability record for this format.
    pub const fn capability(self) -> &'static FormatCapability {
        match self {
            Self::Wav => &WAV,
            Self::Mp3 => &MP3,
            Self::Ogg => &OGG,
            Self::Aiff => &AIFF,
            Self::Aifc => &AIFC,
            Self::Au => &AU,
            Self::Snd => &SND,
        }
    }

    /// File extensions associated with this format.
    pub const fn extensions(self) -> &'static [&'static str] {
        self.capability().extensions
    }

    /// Whether the recorder can write this format.
    pub const fn writing_supported(self) -> bool {
        self.capability().encode
    }

    /// Resolve a format from a file name or path by its extension.
    ///
    /// Returns `None` if the name has no extension or the extension is
    /// not associated with any supported format.
    pub fn from_name(name: &str) -> Option<Self> {
        let dot = name.rfind('.')?;
        let extension = &name[dot + 1..];
        if extension.is_empty() {
            return None;
        }
        let extension = extension.to_ascii_lowercase();

        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&extension.as_str()))
    }
}
