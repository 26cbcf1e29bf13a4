//! Small filesystem helpers shared by the cache and the project stager.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lists regular files under `root` as sorted paths relative to `root`.
///
/// With `skip_hidden`, files and directories whose name starts with `.` are
/// ignored (toolchain build output such as `.pio/` lives there).
pub fn walk_files(root: &Path, skip_hidden: bool) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_into(root, Path::new(""), skip_hidden, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_into(dir: &Path, rel: &Path, skip_hidden: bool, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if skip_hidden && name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let rel_path = rel.join(&name);
        if path.is_dir() {
            walk_into(&path, &rel_path, skip_hidden, files)?;
        } else if path.is_file() {
            files.push(rel_path);
        }
    }
    Ok(())
}

/// Renders a relative path with `/` separators regardless of host.
pub fn to_slash(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively copies `src` (a file or directory) to `dst`, returning the
/// number of bytes copied.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return fs::copy(src, dst);
    }
    fs::create_dir_all(dst)?;
    let mut total = 0;
    for rel in walk_files(src, false)? {
        let target = dst.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        total += fs::copy(src.join(&rel), &target)?;
    }
    Ok(total)
}

/// Total size in bytes of a file or of every file below a directory.
pub fn tree_size(path: &Path) -> io::Result<u64> {
    let meta = fs::metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for rel in walk_files(path, false)? {
        total += fs::metadata(path.join(rel))?.len();
    }
    Ok(total)
}

/// Removes a file or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Milliseconds since the Unix epoch, saturating to zero before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
