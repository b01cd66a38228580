//! Small filesystem helpers shared by the chunk store, stream writer and
//! finalizer.

use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::fs;
use tracing::debug;

/// Move `src` to `dst`, replacing anything already at `dst`.
///
/// Parent directories of `dst` are created. Falls back to copy + remove when
/// the two paths live on different filesystems. After success `src` no
/// longer exists.
pub async fn move_into_place(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(dst).await?;
            fs::rename(src, dst).await
        }
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            debug!(
                "rename {} -> {} crosses devices, copying",
                src.display(),
                dst.display()
            );
            fs::copy(src, dst).await?;
            let file = fs::File::open(dst).await?;
            file.sync_all().await?;
            remove_if_exists(src).await
        }
        Err(err) => Err(err),
    }
}

/// Remove a file, treating an already-missing path as success.
pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("file {} already missing", path.display());
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Recursively remove a directory, treating an already-missing path as success.
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
