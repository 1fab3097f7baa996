//! Resolving the filename of a read request to something that can be read.

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::source::DataSource;

/// Opens files on behalf of the server, once per accepted read request.
pub trait FileSystem: Send + Sync + 'static {
    /// The source a session streams from.
    type Source: DataSource + Send + 'static;

    /// Opens `filename` for reading. `NotFound` and `PermissionDenied` are
    /// reported to the client as the matching TFTP error codes.
    fn open_for_read(&self, filename: &str) -> io::Result<Self::Source>;
}

/// Serves the regular files below a root directory.
#[derive(Clone, Debug)]
pub struct Directory {
    root: PathBuf,
}

impl Directory {
    /// Serves files from `root`, which must exist.
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }

        Ok(Self { root })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `filename` below the root, refusing anything that would
    /// escape it (`..` components, absolute paths, symlinks pointing out).
    pub fn resolve(&self, filename: &str) -> io::Result<PathBuf> {
        let requested = self.root.join(filename.trim_start_matches('/'));
        let path = requested.canonicalize()?;

        if !path.starts_with(&self.root) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                "path escapes the served directory",
            ));
        }

        if !path.is_file() {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "not a regular file"));
        }

        Ok(path)
    }
}

impl FileSystem for Directory {
    type Source = File;

    fn open_for_read(&self, filename: &str) -> io::Result<File> {
        File::open(self.resolve(filename)?)
    }
}
