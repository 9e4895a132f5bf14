//! Read-only access to the accounting fields of a vGPU shared region cache file.
//!
//! The hook runtime inside each container maps a shared region backed by a
//! `*.cache` file. Only three 32-bit fields of that region are of interest to
//! the node agent; their byte offsets depend on the hook runtime build and are
//! therefore described by a [`RegionLayout`] instead of a fixed struct.

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Accounting data parsed from one container's shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SharedRegionSnapshot {
    /// Non-zero while utilization limiting is enforced for the container
    pub utilization_switch: i32,
    /// Most recently observed kernel launch counter
    pub recent_kernel: i32,
    /// Arbitration priority used when containers contend for a device
    pub priority: i32,
}

/// Byte offsets of the accounting fields inside the cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub utilization_switch_offset: u64,
    pub recent_kernel_offset: u64,
    pub priority_offset: u64,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            utilization_switch_offset: 0,
            recent_kernel_offset: 4,
            priority_offset: 8,
        }
    }
}

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Failed to open shared region `{}`", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shared region `{}` is too short to hold a field at offset {offset}", .path.display())]
    Truncated { path: PathBuf, offset: u64 },

    #[error("Failed to read shared region `{}` at offset {offset}", .path.display())]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Loads [`SharedRegionSnapshot`]s from cache files using a fixed layout.
#[derive(Debug, Clone, Default)]
pub struct RegionFileLoader {
    layout: RegionLayout,
}

impl RegionFileLoader {
    pub fn new(layout: RegionLayout) -> Self {
        Self { layout }
    }

    /// Reads the accounting fields from `path`.
    pub fn load(&self, path: &Path) -> Result<SharedRegionSnapshot, RegionError> {
        let mut file = File::open(path).map_err(|source| RegionError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(SharedRegionSnapshot {
            utilization_switch: read_i32(&mut file, path, self.layout.utilization_switch_offset)?,
            recent_kernel: read_i32(&mut file, path, self.layout.recent_kernel_offset)?,
            priority: read_i32(&mut file, path, self.layout.priority_offset)?,
        })
    }
}

fn read_i32(file: &mut File, path: &Path, offset: u64) -> Result<i32, RegionError> {
    let read_error = |source: std::io::Error| RegionError::Read {
        path: path.to_path_buf(),
        offset,
        source,
    };

    file.seek(SeekFrom::Start(offset)).map_err(read_error)?;

    let mut buf = [0u8; 4];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(i32::from_le_bytes(buf)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RegionError::Truncated {
            path: path.to_path_buf(),
            offset,
        }),
        Err(e) => Err(read_error(e)),
    }
}
