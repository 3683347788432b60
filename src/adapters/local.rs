//! Local File Stripe Adapter
//!
//! Stripes stored as plain files. Accepts `file://` URLs or bare paths.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{OpenMode, OpenRequest, StripeTransport};
use crate::error::{Error, Result};

/// Stripe backed by a local file
#[derive(Debug)]
pub struct LocalStripe {
    url: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl LocalStripe {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(&url));
        Self {
            url,
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T> {
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::transport(&self.url, "not open"))?;
        f(file).map_err(|e| Error::transport(&self.url, e))
    }
}

impl StripeTransport for LocalStripe {
    fn url(&self) -> &str {
        &self.url
    }

    fn open(&self, request: &OpenRequest) -> Result<()> {
        let mut options = OpenOptions::new();
        options.read(true);
        match request.mode {
            OpenMode::Read => {}
            OpenMode::Recreate => {
                options.write(true).create(true).truncate(true);
            }
            OpenMode::Update => {
                options.write(true).create(true);
            }
        }

        if request.mode.is_writable() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| Error::transport(&self.url, e))?;
            }
        }

        let file = options
            .open(&self.path)
            .map_err(|e| Error::transport(&self.url, e))?;
        debug!(
            "Opened {} ({:?}, target size {})",
            self.path.display(),
            request.mode,
            request.target_size
        );
        *self.file.lock() = Some(file);
        Ok(())
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = BytesMut::with_capacity(len).writer();
            std::io::copy(&mut file.take(len as u64), &mut buf)?;
            Ok(buf.into_inner().freeze())
        })
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)
        })
    }

    fn truncate(&self, size: u64) -> Result<()> {
        self.with_file(|file| file.set_len(size))
    }

    fn sync(&self) -> Result<()> {
        self.with_file(|file| file.sync_all())
    }

    fn stat(&self) -> Result<u64> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| Error::transport(&self.url, e))
    }

    fn close(&self) -> Result<()> {
        self.file.lock().take();
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.file.lock().take();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::transport(&self.url, e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
