//! Cookie jar shared by every request of an [`HttpService`](super::HttpService).
//!
//! A jar opened with [`CookieJar::load`] is backed by a file readable only by
//! the owner; persistent, unexpired cookies are written back by
//! [`CookieJar::save`].

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use cookie_store::CookieStore;
use reqwest_cookie_store::CookieStoreMutex;

#[derive(Clone)]
pub struct CookieJar {
    store: Arc<CookieStoreMutex>,
    path: Option<PathBuf>,
}

impl CookieJar {
    /// A jar that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(CookieStoreMutex::new(CookieStore::default())),
            path: None,
        }
    }

    /// Opens the jar stored at `path`. A missing file is created empty; an
    /// unreadable one is ignored and overwritten on the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = match read_file(&path) {
            Ok(store) => {
                tracing::debug!(target: "taskbot.net", path = %path.display(), "loaded cookies");
                store
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Err(e) = open_private(&path) {
                    tracing::error!(target: "taskbot.net", path = %path.display(), error = %e, "failed to create cookie file");
                }
                CookieStore::default()
            }
            Err(e) => {
                tracing::warn!(target: "taskbot.net", path = %path.display(), error = %e, "ignoring unreadable cookie file");
                CookieStore::default()
            }
        };
        Self {
            store: Arc::new(CookieStoreMutex::new(store)),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of cookies currently held, expired ones excluded.
    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_unexpired()
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the jar back to its file, completely overwriting it. In-memory
    /// jars have nothing to do.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writer = BufWriter::new(open_private(path)?);
        write_store(&store, &mut writer)?;
        writer.flush()?;
        tracing::debug!(target: "taskbot.net", path = %path.display(), "saved cookies");
        Ok(())
    }

    pub(crate) fn provider(&self) -> Arc<CookieStoreMutex> {
        self.store.clone()
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn read_file(path: &Path) -> io::Result<CookieStore> {
    let file = fs::File::open(path)?;
    restrict_permissions(path);
    if file.metadata()?.len() == 0 {
        return Ok(CookieStore::default());
    }
    read_store(BufReader::new(file))
}

#[allow(deprecated)]
fn read_store<R: BufRead>(reader: R) -> io::Result<CookieStore> {
    CookieStore::load_json(reader).map_err(io::Error::other)
}

#[allow(deprecated)]
fn write_store<W: Write>(store: &CookieStore, writer: &mut W) -> io::Result<()> {
    store.save_json(writer).map_err(io::Error::other)
}

/// Opens `path` for writing with owner-only permissions, truncating it.
fn open_private(path: &Path) -> io::Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let file = opts.open(path)?;
    restrict_permissions(path);
    Ok(file)
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::error!(target: "taskbot.net", path = %path.display(), error = %e, "failed to fix cookie file mode");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
