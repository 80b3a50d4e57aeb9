//! Extension lookup over the registered formats

use std::collections::HashMap;

use thiserror::Error;

use super::Format;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Extension {extension} claimed by both {first} and {second}")]
    DuplicateExtension {
        extension: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("Format {0} has no extensions")]
    NoExtensions(&'static str),
}

/// Read-only table of formats, keyed by every accepted extension.
///
/// Built once at startup and shared behind an `Arc`; lookups never lock.
#[derive(Debug)]
pub struct FormatRegistry {
    formats: Vec<&'static Format>,
    by_extension: HashMap<String, usize>,
}

impl FormatRegistry {
    /// Register formats, rejecting any extension claimed twice.
    pub fn new(formats: Vec<&'static Format>) -> Result<Self, RegistryError> {
        let mut by_extension = HashMap::new();

        for (idx, format) in formats.iter().enumerate() {
            if format.extensions.is_empty() {
                return Err(RegistryError::NoExtensions(format.name));
            }
            for ext in format.extensions {
                let key = normalize_extension(ext);
                if let Some(prev) = by_extension.insert(key.clone(), idx) {
                    let first: &Format = formats[prev];
                    return Err(RegistryError::DuplicateExtension {
                        extension: key,
                        first: first.name,
                        second: format.name,
                    });
                }
            }
        }

        Ok(Self {
            formats,
            by_extension,
        })
    }

    /// Registry with the built-in WAV, MP3 and FLAC formats
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(super::builtin_formats())
    }

    /// Case-insensitive lookup; the leading dot is optional.
    pub fn lookup_by_extension(&self, ext: &str) -> Option<&'static Format> {
        let key = normalize_extension(ext);
        if key.len() < 2 {
            return None;
        }
        self.by_extension.get(&key).map(|&idx| self.formats[idx])
    }

    /// Lookup by the extension of the last component of a path or file name.
    pub fn lookup_by_path(&self, path: &str) -> Option<&'static Format> {
        extension_of(path).and_then(|ext| self.lookup_by_extension(ext))
    }

    /// Every registered format, in registration order
    pub fn formats(&self) -> &[&'static Format] {
        &self.formats
    }

    /// Formats a client may convert into
    pub fn output_formats(&self) -> impl Iterator<Item = &'static Format> + '_ {
        self.formats.iter().copied().filter(|f| f.can_encode())
    }

    /// All extensions accepted for upload, in registration order
    pub fn accepted_extensions(&self) -> Vec<&'static str> {
        self.formats
            .iter()
            .filter(|f| f.can_decode())
            .flat_map(|f| f.extensions.iter().copied())
            .collect()
    }
}

/// Extension (with dot) of the final path component, if any.
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.rfind('.').map(|idx| &name[idx..])
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
