// src/files.rs
use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use arrayvec::ArrayVec;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{HandlerResult, PathError};
use crate::http::{ContentType, Continuation, Request, Response, status};

/// Longest file path, terminator slot included.
pub const FILEPATH_MAX_LEN: usize = 128;
pub const MAX_PATH_SEGMENTS: usize = 3;
pub const ACCESS_HISTORY_SIZE: usize = 16;

/// Joins the captured route segments onto the mount point.
pub fn build_file_path<'a>(
    mount: &Path,
    segments: impl ExactSizeIterator<Item = &'a str>,
) -> Result<PathBuf, PathError> {
    if segments.len() > MAX_PATH_SEGMENTS {
        return Err(PathError::TooManySegments);
    }

    let mut path = mount.to_path_buf();
    for segment in segments {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(PathError::InvalidSegment);
        }
        path.push(segment);
    }

    if path.as_os_str().len() >= FILEPATH_MAX_LEN {
        return Err(PathError::TooLong);
    }
    Ok(path)
}

/// Opens a regular file for reading along with its size.
pub fn open_read(path: &Path) -> io::Result<(File, u64)> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::ErrorKind::NotFound.into());
    }
    Ok((File::open(path)?, meta.len()))
}

/// Creates the file, or truncates it if it already exists.
pub fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAccess {
    pub path: String,
    pub count: u32,
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Most recently seen paths and how often they were accessed. A full table
/// ignores new paths.
#[derive(Debug, Default)]
pub struct AccessHistory {
    entries: ArrayVec<FileAccess, ACCESS_HISTORY_SIZE>,
}

impl AccessHistory {
    pub fn record(&mut self, path: &str, kind: AccessKind) {
        let entry = match self.entries.iter_mut().position(|e| e.path == path) {
            Some(idx) => &mut self.entries[idx],
            None => {
                let fresh = FileAccess {
                    path: path.to_string(),
                    count: 0,
                    read: false,
                    write: false,
                };
                if self.entries.try_push(fresh).is_err() {
                    debug!(path, "access history full");
                    return;
                }
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        };

        entry.count += 1;
        match kind {
            AccessKind::Read => entry.read = true,
            AccessKind::Write => entry.write = true,
        }
    }

    pub fn entries(&self) -> &[FileAccess] {
        &self.entries
    }
}

/// Streams files below a mount point.
#[derive(Debug)]
pub struct FilesServer {
    mount_point: PathBuf,
    history: RefCell<AccessHistory>,
}

impl FilesServer {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            history: RefCell::new(AccessHistory::default()),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Writes the request body chunk by chunk. The file is opened on the
    /// first chunk and closed once the body is complete.
    pub fn upload(&self, req: &mut Request, resp: &mut Response) -> HandlerResult {
        if req.begins() {
            let path = match build_file_path(&self.mount_point, req.route_args()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(url = %req.url(), "rejecting upload: {}", e);
                    req.discard();
                    resp.set_status(status::BAD_REQUEST);
                    return Ok(());
                }
            };

            let file = match open_write(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), "cannot create file: {}", e);
                    req.discard();
                    resp.set_status(status::BAD_REQUEST);
                    return Ok(());
                }
            };

            info!(path = %path.display(), len = req.content_length(), "upload started");
            self.record(req, AccessKind::Write);
            req.user_data = Continuation::Upload(file);
        }

        let (payload, continuation) = req.payload_with_continuation();
        if let Continuation::Upload(file) = continuation {
            if !payload.is_empty() {
                // A failed write drops the file through the dispatcher.
                file.write_all(payload)?;
            }
        }

        if req.is_complete() {
            if let Continuation::Upload(file) = req.user_data.take() {
                file.sync_all()?;
                info!(url = %req.url(), len = req.payload_len(), "upload complete");
            }
        }
        Ok(())
    }

    /// Sends the file one response buffer at a time.
    pub fn download(&self, req: &mut Request, resp: &mut Response) -> HandlerResult {
        if resp.is_first_call() {
            let path = match build_file_path(&self.mount_point, req.route_args()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(url = %req.url(), "rejecting download: {}", e);
                    resp.set_status(status::BAD_REQUEST);
                    return Ok(());
                }
            };

            let (file, size) = match open_read(&path) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no such file");
                    resp.set_status(status::NOT_FOUND);
                    return Ok(());
                }
                Err(e) => {
                    warn!(path = %path.display(), "cannot open file: {}", e);
                    resp.set_status(status::INTERNAL_SERVER_ERROR);
                    return Ok(());
                }
            };

            info!(path = %path.display(), size, "download started");
            self.record(req, AccessKind::Read);
            resp.set_content_length(size);
            resp.set_content_type(ContentType::OctetStream);
            req.user_data = Continuation::Download(file);
        }

        let Continuation::Download(file) = &mut req.user_data else {
            return Ok(());
        };

        let capacity = resp.payload_capacity();
        let filled = read_full(file, resp.payload_mut())?;
        resp.set_filling(filled);

        if filled == capacity {
            resp.mark_not_complete();
        } else {
            req.user_data.take();
        }
        Ok(())
    }

    /// Access history as a JSON array.
    pub fn stats(&self, _req: &mut Request, resp: &mut Response) -> HandlerResult {
        let history = self.history.borrow();
        serde_json::to_writer(&mut *resp, history.entries())?;
        Ok(())
    }

    pub fn history(&self) -> Vec<FileAccess> {
        self.history.borrow().entries().to_vec()
    }

    fn record(&self, req: &Request, kind: AccessKind) {
        let key = req.route_args().collect::<Vec<_>>().join("/");
        self.history.borrow_mut().record(&key, kind);
    }
}

/// Reads until `buf` is full or the file ends.
fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
