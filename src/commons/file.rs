//! Helpers for reading and writing the files of a depot.
use std::{error, fmt, fs, io};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use log::trace;
use tempfile::NamedTempFile;


//------------ IoError -------------------------------------------------------

/// An I/O error with a description of what was being attempted.
#[derive(Debug)]
pub struct IoError {
    context: String,
    cause: io::Error,
}

impl IoError {
    pub fn new(context: impl Into<String>, cause: io::Error) -> Self {
        IoError { context: context.into(), cause }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.cause.kind()
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.cause)
    }
}

impl error::Error for IoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.cause)
    }
}


//------------ Functions -----------------------------------------------------

/// Creates a directory and its parents if needed.
pub fn create_dir(dir: &Path) -> Result<(), IoError> {
    if !dir.is_dir() {
        fs::create_dir_all(dir).map_err(|e| {
            IoError::new(
                format!("could not create dir: {}", dir.display()), e
            )
        })?;
    }
    Ok(())
}

/// Reads a file.
pub fn read(path: &Path) -> Result<Vec<u8>, IoError> {
    let mut f = File::open(path).map_err(|e| {
        IoError::new(format!("could not open: '{}'", path.display()), e)
    })?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes).map_err(|e| {
        IoError::new(format!("could not read: '{}'", path.display()), e)
    })?;
    Ok(bytes)
}

/// Reads a file, returning `Ok(None)` if it does not exist.
pub fn read_opt(path: &Path) -> Result<Option<Vec<u8>>, IoError> {
    match read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Replaces the content of a file without ever exposing a partial write.
///
/// The content goes to a temporary file in the target directory first. Its
/// permissions are set to `mode` on unix systems. Any existing file is then
/// removed and the temporary file moved into its place.
pub fn save_atomic(
    content: &[u8], path: &Path, mode: u32,
) -> Result<(), IoError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir(dir)?;

    let mut tmp_file = NamedTempFile::new_in(dir).map_err(|e| {
        IoError::new(
            format!("could not create temp file in: '{}'", dir.display()), e
        )
    })?;
    tmp_file.write_all(content).map_err(|e| {
        IoError::new(
            format!("could not write temp file: '{}'",
                tmp_file.path().display()
            ),
            e
        )
    })?;
    tmp_file.as_file().sync_all().map_err(|e| {
        IoError::new(
            format!("could not sync temp file: '{}'",
                tmp_file.path().display()
            ),
            e
        )
    })?;
    set_mode(tmp_file.as_file(), mode).map_err(|e| {
        IoError::new(
            format!("could not set permissions on: '{}'",
                tmp_file.path().display()
            ),
            e
        )
    })?;

    // Read-only targets cannot be replaced by a rename on every platform.
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(IoError::new(
                format!("could not remove stale file: '{}'", path.display()),
                e
            ))
        }
    }

    tmp_file.persist(path).map_err(|err| {
        IoError::new(
            format!(
                "could not rename temp file '{}' to '{}'",
                err.file.path().display(),
                path.display()
            ),
            err.error
        )
    })?;

    trace!("Saved file: {}", path.display());
    Ok(())
}

/// Saves a new file with the given mode, refusing to overwrite anything.
pub fn save_new(
    content: &[u8], path: &Path, mode: u32,
) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut f = options.open(path).map_err(|e| {
        IoError::new(format!("could not create: '{}'", path.display()), e)
    })?;
    f.write_all(content).map_err(|e| {
        IoError::new(format!("could not write to: '{}'", path.display()), e)
    })?;

    trace!("Saved file: {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}


//------------ Tests ---------------------------------------------------------
