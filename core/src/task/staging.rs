use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use zip::ZipArchive;

use crate::errors::StagingError;
use crate::session::AuthSession;

use super::details::DataSource;

/// Fetches every data archive and extracts it into `work_dir`.
pub async fn stage_data(
    session: &AuthSession,
    data: &[DataSource],
    work_dir: &Path,
) -> Result<(), StagingError> {
    for item in data {
        tracing::info!(target: "taskbot.staging", url = %item.url, name = %item.name, "fetching data");
        let resp = session
            .service()
            .request(&item.url, None, session.options(), None)
            .await
            .map_err(|source| StagingError::Fetch {
                url: item.url.clone(),
                source,
            })?;

        let name = item.name.clone();
        let dest = work_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || extract_archive(&name, resp.body, &dest))
            .await
            .map_err(|e| StagingError::Io {
                name: item.name.clone(),
                source: io::Error::other(e),
            })??;
        tracing::debug!(target: "taskbot.staging", name = %item.name, files, "extracted");
    }
    Ok(())
}

/// Extracts a zip archive under `dest`. Members whose path would land outside
/// `dest` fail the whole archive. Returns the number of files written.
pub fn extract_archive(name: &str, body: Bytes, dest: &Path) -> Result<usize, StagingError> {
    let archive_err = |source| StagingError::Archive {
        name: name.to_string(),
        source,
    };
    let io_err = |source| StagingError::Io {
        name: name.to_string(),
        source,
    };

    let mut archive = ZipArchive::new(Cursor::new(body)).map_err(archive_err)?;
    let mut written = 0;
    for i in 0..archive.len() {
        let mut member = archive.by_index(i).map_err(archive_err)?;
        let Some(rel) = member.enclosed_name() else {
            return Err(StagingError::UnsafePath {
                name: name.to_string(),
                member: member.name().to_string(),
            });
        };
        let out: PathBuf = dest.join(rel);

        if member.is_dir() {
            fs::create_dir_all(&out).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = fs::File::create(&out).map_err(io_err)?;
        io::copy(&mut member, &mut file).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = member.unix_mode() {
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(io_err)?;
            }
        }
        written += 1;
    }
    Ok(written)
}
