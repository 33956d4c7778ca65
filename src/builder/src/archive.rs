//! Tar stream assembly for the copy verb, and the path-safety policy
//! guarding it.
//!
//! Copy sources resolve against the host working directory by lexical
//! normalization only (symlinks are not followed); a source that escapes
//! the working directory fails the build. The assembled stream is rooted at
//! the in-container destination so it can be extracted at `/`, creating
//! intermediate directories along the way. Timestamps are zeroed and
//! ownership is forced to 0:0 to decouple the image from the host.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use tar::{Builder as TarBuilder, EntryType, Header};

use box_core::error::{BoxError, Result};

/// Lexically normalize an absolute path, resolving `.` and `..` without
/// touching the filesystem. `None` when `..` would climb above the root.
pub fn normalize_abs(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
            Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Resolve a copy source against the working directory, rejecting anything
/// that escapes it.
pub fn safe_source(root: &Path, src: &str) -> Result<PathBuf> {
    let escape = || BoxError::PathSafety {
        path: src.to_string(),
    };
    let normalized = normalize_abs(&root.join(src)).ok_or_else(escape)?;
    if normalized.starts_with(root) {
        Ok(normalized)
    } else {
        Err(escape())
    }
}

/// Assemble the upload stream for copying `src` into a container at the
/// normalized absolute path `dest`.
///
/// For a directory source, its contents land under `dest`. For a file
/// source, `into_dir` selects between "into the directory" (destination
/// ended with `/`) and "as that path". Entries appear parents-first; modes
/// are preserved, symlinks are kept as links.
pub fn archive_for_upload(src: &Path, dest: &str, into_dir: bool) -> Result<Vec<u8>> {
    let metadata = fs::symlink_metadata(src)
        .map_err(|e| BoxError::Archive(format!("{}: {}", src.display(), e)))?;

    let dest_rel = PathBuf::from(dest.trim_start_matches('/'));
    let mut builder = TarBuilder::new(Vec::new());

    if metadata.is_dir() {
        append_ancestors(&mut builder, &dest_rel)?;
        append_dir_contents(&mut builder, src, &dest_rel)?;
    } else {
        let file_path = if into_dir || dest_rel.as_os_str().is_empty() {
            let name = src
                .file_name()
                .ok_or_else(|| BoxError::Archive(format!("{}: no file name", src.display())))?;
            dest_rel.join(name)
        } else {
            dest_rel
        };
        if let Some(parent) = file_path.parent() {
            append_ancestors(&mut builder, parent)?;
        }
        append_entry(&mut builder, src, &file_path, &metadata)?;
    }

    builder
        .into_inner()
        .map_err(|e| BoxError::Archive(format!("finalizing stream: {}", e)))
}

/// Emit directory entries for every path component of `dest`, parents
/// first, so extraction at `/` creates the destination chain.
fn append_ancestors<W: std::io::Write>(builder: &mut TarBuilder<W>, dest: &Path) -> Result<()> {
    let mut prefix = PathBuf::new();
    for component in dest.components() {
        prefix.push(component);
        append_dir_header(builder, &prefix, 0o755)?;
    }
    Ok(())
}

/// Recursively append a directory's contents, sorted by name so the stream
/// is deterministic.
fn append_dir_contents<W: std::io::Write>(
    builder: &mut TarBuilder<W>,
    dir: &Path,
    prefix: &Path,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| BoxError::Archive(format!("{}: {}", dir.display(), e)))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| BoxError::Archive(format!("{}: {}", dir.display(), e)))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = fs::symlink_metadata(&path)
            .map_err(|e| BoxError::Archive(format!("{}: {}", path.display(), e)))?;
        let tar_path = prefix.join(entry.file_name());

        if metadata.is_dir() {
            append_dir_header(builder, &tar_path, metadata.permissions().mode())?;
            append_dir_contents(builder, &path, &tar_path)?;
        } else {
            append_entry(builder, &path, &tar_path, &metadata)?;
        }
    }
    Ok(())
}

/// Append a single file or symlink.
fn append_entry<W: std::io::Write>(
    builder: &mut TarBuilder<W>,
    source: &Path,
    tar_path: &Path,
    metadata: &fs::Metadata,
) -> Result<()> {
    let mut header = deterministic_header(metadata.permissions().mode());

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(source)
            .map_err(|e| BoxError::Archive(format!("{}: {}", source.display(), e)))?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, tar_path, &target)
            .map_err(|e| BoxError::Archive(format!("{}: {}", source.display(), e)))?;
    } else {
        let file = fs::File::open(source)
            .map_err(|e| BoxError::Archive(format!("{}: {}", source.display(), e)))?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());
        builder
            .append_data(&mut header, tar_path, file)
            .map_err(|e| BoxError::Archive(format!("{}: {}", source.display(), e)))?;
    }
    Ok(())
}

fn append_dir_header<W: std::io::Write>(
    builder: &mut TarBuilder<W>,
    tar_path: &Path,
    mode: u32,
) -> Result<()> {
    let mut header = deterministic_header(mode);
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    builder
        .append_data(&mut header, tar_path, std::io::empty())
        .map_err(|e| BoxError::Archive(format!("{}: {}", tar_path.display(), e)))
}

/// A header with zeroed timestamps and 0:0 ownership.
fn deterministic_header(mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_mode(mode & 0o7777);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}
