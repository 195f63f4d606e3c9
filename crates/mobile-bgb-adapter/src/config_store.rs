use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::MOBILE_CONFIG_SIZE;

/// File-backed libmobile configuration blob.
///
/// The file is created (or zero-padded) to [`MOBILE_CONFIG_SIZE`] bytes when
/// opened, kept in memory, and rewritten on every change.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    data: Box<[u8; MOBILE_CONFIG_SIZE]>,
}

fn range(offset: usize, len: usize) -> io::Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= MOBILE_CONFIG_SIZE => Ok(offset..end),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("config range {offset:#x}+{len:#x} out of bounds"),
        )),
    }
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut data = Box::new([0u8; MOBILE_CONFIG_SIZE]);

        match fs::read(&path) {
            Ok(bytes) => {
                let len = bytes.len().min(MOBILE_CONFIG_SIZE);
                data[..len].copy_from_slice(&bytes[..len]);
                if bytes.len() < MOBILE_CONFIG_SIZE {
                    fs::write(&path, &data[..])?;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Bridge: creating config file {}", path.display());
                fs::write(&path, &data[..])?;
            }
            Err(e) => return Err(e),
        }

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Fills `dest` from `offset`. The whole range must lie inside the blob.
    pub fn read(&self, dest: &mut [u8], offset: usize) -> io::Result<()> {
        let range = range(offset, dest.len())?;
        dest.copy_from_slice(&self.data[range]);
        Ok(())
    }

    /// Stores `src` at `offset` and persists the blob. The in-memory copy
    /// only changes once the file has been written.
    pub fn write(&mut self, src: &[u8], offset: usize) -> io::Result<()> {
        let range = range(offset, src.len())?;
        let mut next = self.data.clone();
        next[range].copy_from_slice(src);
        fs::write(&self.path, &next[..]).inspect_err(|e| {
            warn!("Bridge: failed to save {}: {e}", self.path.display());
        })?;
        self.data = next;
        Ok(())
    }
}
