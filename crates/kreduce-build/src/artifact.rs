//! Compiled artifacts and their structural validation.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use kreduce_core::ContentHash;
use serde::{Deserialize, Serialize};

/// A loadable compiled unit for one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Derived artifact name (also the build target name).
    pub name: String,
    /// Location of the shared library.
    pub path: PathBuf,
    /// Digest of the cache key this artifact was built for.
    pub key_digest: ContentHash,
}

/// Recognised shared-library file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryFormat {
    Elf,
    MachO,
    Pe,
}

/// Check that `path` looks like a shared library: a non-empty regular file
/// starting with an ELF, Mach-O or PE signature.
///
/// Returns the detected format and file size, or a reason it was rejected.
pub fn check_library(path: &Path) -> Result<(LibraryFormat, u64), String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("cannot stat: {e}"))?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    if meta.len() == 0 {
        return Err("file is empty".to_string());
    }

    let mut magic = [0u8; 4];
    let mut file = File::open(path).map_err(|e| format!("cannot open: {e}"))?;
    let n = file
        .read(&mut magic)
        .map_err(|e| format!("cannot read header: {e}"))?;

    let format = detect_format(&magic[..n]).ok_or_else(|| {
        format!(
            "unrecognised file signature {:02x?}",
            &magic[..n]
        )
    })?;
    Ok((format, meta.len()))
}

fn detect_format(magic: &[u8]) -> Option<LibraryFormat> {
    match magic {
        [0x7f, b'E', b'L', b'F', ..] => Some(LibraryFormat::Elf),
        [0xfe, 0xed, 0xfa, 0xce | 0xcf, ..]
        | [0xce | 0xcf, 0xfa, 0xed, 0xfe, ..]
        | [0xca, 0xfe, 0xba, 0xbe, ..] => Some(LibraryFormat::MachO),
        [b'M', b'Z', ..] => Some(LibraryFormat::Pe),
        _ => None,
    }
}

/// Shared-library file name for an artifact name on this platform.
pub fn library_file_name(name: &str) -> String {
    format!("{name}{}", std::env::consts::DLL_SUFFIX)
}
