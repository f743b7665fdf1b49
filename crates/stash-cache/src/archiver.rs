//! Tar packing and unpacking of mount directories.

use crate::compression::{self, Encoder};
use crate::envelope::{self, EnvelopeWriter, ObjectInfo};
use stash_core::{CompressionType, Error, Result};
use std::collections::HashSet;
use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tar::{EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Archive a mount directory into an encoded cache object written to `out`.
///
/// Entries stream through the compressor straight into `out`; no more than
/// a codec window is held in memory.
pub fn archive<W: Write + Seek>(
    mount: &Path,
    compression: CompressionType,
    out: W,
) -> Result<(W, ObjectInfo)> {
    let envelope = EnvelopeWriter::new(out, compression)?;
    let encoder = create_archive(Encoder::new(envelope, compression)?, mount)?;
    let envelope = encoder
        .finish()
        .map_err(|e| Error::Internal(format!("Failed to finish compression: {}", e)))?;
    envelope.finish()
}

/// Verify a cache object and unpack it into `dest`.
pub fn extract<R: Read + Seek>(object: R, dest: &Path) -> Result<()> {
    let (compression, payload) = envelope::open(object)?;
    let reader = compression::decoder(BufReader::new(payload), compression)?;
    extract_archive(reader, dest)
}

/// Write every entry under `root` to a tar stream.
///
/// Entries are visited in file-name order so identical trees produce
/// identical bytes. Symlinks are stored as links, never followed.
pub fn create_archive<W: Write>(writer: W, root: &Path) -> Result<W> {
    let root_meta = fs::metadata(root).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::MountNotFound(root.to_path_buf()),
        _ => Error::filesystem(root, e),
    })?;
    if !root_meta.is_dir() {
        return Err(Error::filesystem(
            root,
            io::Error::new(io::ErrorKind::InvalidInput, "mount is not a directory"),
        ));
    }

    let mut builder = tar::Builder::new(writer);
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1);

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
            Error::filesystem(path, source)
        })?;
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|_| Error::Internal(format!("{} escaped the mount", path.display())))?;
        let meta = entry.metadata().map_err(|e| {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("metadata unavailable"));
            Error::filesystem(path, source)
        })?;

        let mut header = Header::new_gnu();
        header.set_mode(mode_of(&meta));
        header.set_mtime(mtime_of(&meta));
        header.set_uid(0);
        header.set_gid(0);

        let file_type = entry.file_type();
        let appended = if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, rel, io::empty())
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| Error::filesystem(path, e))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, rel, &target)
        } else if file_type.is_file() {
            let file = File::open(path).map_err(|e| Error::filesystem(path, e))?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(meta.len());
            builder.append_data(&mut header, rel, SizedReader::new(file, meta.len()))
        } else {
            debug!(path = %path.display(), "Skipping special file");
            continue;
        };
        appended.map_err(|e| Error::filesystem(path, e))?;
    }

    builder
        .into_inner()
        .map_err(|e| Error::Internal(format!("Failed to finish tar: {}", e)))
}

/// Unpack a tar stream into `dest`, creating it if needed.
///
/// Existing entries at the same relative path are replaced; anything else
/// already under `dest` is left alone. Read-only directories left by an
/// earlier restore are made writable while their contents are replaced and
/// get their recorded mode back at the end.
pub fn extract_archive<R: Read>(reader: R, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| Error::filesystem(dest, e))?;

    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(false);

    let entries = archive.entries().map_err(corrupt)?;
    let mut relaxed = RelaxedDirs::default();

    // Directories go last so read-only modes don't block their children.
    let mut directories = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        validate_archive_relative_path(&path)?;

        match entry.header().entry_type() {
            EntryType::Directory => directories.push(entry),
            EntryType::Regular | EntryType::Symlink | EntryType::GNUSparse => {
                clear_way(dest, &path, false, &mut relaxed)?;
                entry
                    .unpack_in(dest)
                    .map_err(|e| unpack_error(dest, &path, e))?;
            }
            other => {
                return Err(Error::CorruptStream(format!(
                    "unsupported entry type {:?} for {}",
                    other,
                    path.display()
                )));
            }
        }
    }

    directories.sort_by(|a, b| b.path_bytes().cmp(&a.path_bytes()));
    let mut restored = HashSet::new();
    for mut dir in directories {
        let path = dir.path().map_err(corrupt)?.into_owned();
        clear_way(dest, &path, true, &mut relaxed)?;
        dir.unpack_in(dest)
            .map_err(|e| unpack_error(dest, &path, e))?;
        restored.insert(dest.join(&path));
    }

    relaxed.restore(&restored)
}

/// Make room for `rel` under `dest` without following links.
///
/// Ancestors that exist as anything but a real directory are removed, as is
/// a directory standing where a file or link is about to go. Existing
/// ancestor directories are made writable.
fn clear_way(dest: &Path, rel: &Path, is_dir: bool, relaxed: &mut RelaxedDirs) -> Result<()> {
    relaxed.make_writable(dest)?;

    let components: Vec<_> = rel
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    let mut current = dest.to_path_buf();
    for (index, component) in components.iter().enumerate() {
        current.push(component);
        let meta = match fs::symlink_metadata(&current) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::filesystem(&current, e)),
        };
        let is_last = index + 1 == components.len();

        if meta.is_dir() {
            if is_last && !is_dir {
                remove_tree(&current)?;
            } else if !is_last {
                relaxed.make_writable(&current)?;
            }
        } else if !is_last || is_dir {
            debug!(path = %current.display(), "Removing entry in the way of a directory");
            fs::remove_file(&current).map_err(|e| Error::filesystem(&current, e))?;
            return Ok(());
        }
    }
    Ok(())
}

/// Remove a directory tree, first making its directories writable.
fn remove_tree(root: &Path) -> Result<()> {
    debug!(path = %root.display(), "Removing directory in the way of a file");
    let mut relaxed = RelaxedDirs::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
            Error::filesystem(path, source)
        })?;
        if entry.file_type().is_dir() {
            relaxed.make_writable(entry.path())?;
        }
    }
    fs::remove_dir_all(root).map_err(|e| Error::filesystem(root, e))
}

/// Directories whose owner-write bit was added during extraction, with the
/// permissions they had before.
#[derive(Default)]
struct RelaxedDirs {
    original: Vec<(PathBuf, fs::Permissions)>,
}

impl RelaxedDirs {
    #[cfg(unix)]
    fn make_writable(&mut self, dir: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let meta = match fs::symlink_metadata(dir) {
            Ok(meta) if meta.is_dir() => meta,
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::filesystem(dir, e)),
        };
        let permissions = meta.permissions();
        if permissions.mode() & 0o200 != 0 {
            return Ok(());
        }

        let mut writable = permissions.clone();
        writable.set_mode(permissions.mode() | 0o200);
        fs::set_permissions(dir, writable).map_err(|e| Error::filesystem(dir, e))?;
        self.original.push((dir.to_path_buf(), permissions));
        Ok(())
    }

    #[cfg(not(unix))]
    fn make_writable(&mut self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    /// Put back the old mode of every directory the archive did not set.
    fn restore(self, set_by_archive: &HashSet<PathBuf>) -> Result<()> {
        for (dir, permissions) in self.original.into_iter().rev() {
            if set_by_archive.contains(&dir) || !dir.is_dir() {
                continue;
            }
            fs::set_permissions(&dir, permissions).map_err(|e| Error::filesystem(&dir, e))?;
        }
        Ok(())
    }
}

/// Yields exactly `len` bytes: the file's content, cut short or padded with
/// zeros if it changed size after its header was written.
struct SizedReader<R> {
    inner: io::Take<R>,
    remaining: u64,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner: inner.take(len),
            remaining: len,
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let mut read = self.inner.read(buf)?;
        if read == 0 {
            let pad = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
            buf[..pad].fill(0);
            read = pad;
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

fn validate_archive_relative_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(Error::CorruptStream(format!(
                    "entry path {} is not relative to the mount",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

fn corrupt(e: io::Error) -> Error {
    Error::CorruptStream(format!("Failed to read archive: {}", e))
}

fn unpack_error(dest: &Path, path: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => corrupt(e),
        _ => Error::filesystem(dest.join(path), e),
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

fn mtime_of(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use walkdir::WalkDir;

    fn pack(src: &Path, compression: CompressionType) -> Result<Vec<u8>> {
        let (cursor, info) = archive(src, compression, Cursor::new(Vec::new()))?;
        let object = cursor.into_inner();
        assert_eq!(info.bytes, object.len() as u64);
        Ok(object)
    }

    fn unpack(object: &[u8], dest: &Path) -> Result<()> {
        extract(Cursor::new(object), dest)
    }

    /// Relative path -> (kind, content or link target).
    fn snapshot(root: &Path) -> BTreeMap<String, (String, Vec<u8>)> {
        let mut out = BTreeMap::new();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.unwrap();
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let ft = entry.file_type();
            let value = if ft.is_symlink() {
                let target = fs::read_link(entry.path()).unwrap();
                ("link".to_string(), target.to_string_lossy().as_bytes().to_vec())
            } else if ft.is_dir() {
                ("dir".to_string(), vec![])
            } else {
                ("file".to_string(), fs::read(entry.path()).unwrap())
            };
            out.insert(rel, value);
        }
        out
    }

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        fs::write(root.join("src/nested/data.bin"), [0u8, 1, 2, 255]).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("src/lib.rs", root.join("link.rs")).unwrap();
    }

    #[test]
    fn test_round_trip_reproduces_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src-tree");
        let dst = tmp.path().join("restored");
        sample_tree(&src);

        let object = pack(&src, CompressionType::Zstd).unwrap();
        unpack(&object, &dst).unwrap();

        assert_eq!(snapshot(&src), snapshot(&dst));
        assert!(dst.join("empty").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_round_trip_preserves_modes_and_links() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src-tree");
        let dst = tmp.path().join("restored");
        sample_tree(&src);
        fs::write(src.join("run.sh"), "#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(src.join("run.sh"), fs::Permissions::from_mode(0o750)).unwrap();
        fs::set_permissions(src.join("a.txt"), fs::Permissions::from_mode(0o600)).unwrap();
        // Dangling links are stored as-is.
        std::os::unix::fs::symlink("does/not/exist", src.join("dangling")).unwrap();

        let object = pack(&src, CompressionType::Gzip).unwrap();
        unpack(&object, &dst).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&dst.join("run.sh")), 0o750);
        assert_eq!(mode(&dst.join("a.txt")), 0o600);
        assert_eq!(
            fs::read_link(dst.join("link.rs")).unwrap(),
            Path::new("src/lib.rs")
        );
        assert_eq!(
            fs::read_link(dst.join("dangling")).unwrap(),
            Path::new("does/not/exist")
        );
    }

    #[test]
    fn test_archive_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        sample_tree(&src);

        let first = create_archive(Vec::new(), &src).unwrap();
        let second = create_archive(Vec::new(), &src).unwrap();
        assert_eq!(first, second);

        let first = pack(&src, CompressionType::Zstd).unwrap();
        let second = pack(&src, CompressionType::Zstd).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_entries_are_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        fs::create_dir_all(&src).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            fs::write(src.join(name), name).unwrap();
        }

        let tarball = create_archive(Vec::new(), &src).unwrap();
        let mut reader = tar::Archive::new(Cursor::new(tarball));
        let names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_long_paths_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        let dst = tmp.path().join("out");
        let deep = src.join("a".repeat(60)).join("b".repeat(60)).join("c".repeat(60));
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("file.txt"), "deep").unwrap();

        unpack(&pack(&src, CompressionType::None).unwrap(), &dst).unwrap();
        assert_eq!(snapshot(&src), snapshot(&dst));
    }

    #[test]
    fn test_missing_mount_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = pack(&tmp.path().join("nope"), CompressionType::Zstd).unwrap_err();
        assert!(matches!(err, Error::MountNotFound(_)));
    }

    #[test]
    fn test_file_mount_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let err = pack(&file, CompressionType::Zstd).unwrap_err();
        assert!(matches!(err, Error::Filesystem { .. }));
    }

    #[test]
    fn test_extract_overwrites_but_does_not_prune() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "fresh").unwrap();

        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("a.txt"), "stale content that is longer").unwrap();
        fs::write(dst.join("extra.txt"), "keep me").unwrap();

        unpack(&pack(&src, CompressionType::Zstd).unwrap(), &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "fresh");
        assert_eq!(fs::read_to_string(dst.join("extra.txt")).unwrap(), "keep me");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_replaces_symlink_instead_of_writing_through() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let outside = tmp.path().join("outside.txt");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "cached").unwrap();

        fs::create_dir_all(&dst).unwrap();
        fs::write(&outside, "untouched").unwrap();
        std::os::unix::fs::symlink(&outside, dst.join("a.txt")).unwrap();

        unpack(&pack(&src, CompressionType::Zstd).unwrap(), &dst).unwrap();

        assert_eq!(fs::read_to_string(&outside).unwrap(), "untouched");
        assert!(!fs::symlink_metadata(dst.join("a.txt")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "cached");
    }

    #[test]
    fn test_extract_into_partial_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        sample_tree(&src);
        let object = pack(&src, CompressionType::Lz4).unwrap();

        // Simulate an interrupted earlier restore.
        fs::create_dir_all(dst.join("src")).unwrap();
        fs::write(dst.join("src/lib.rs"), "half writ").unwrap();

        unpack(&object, &dst).unwrap();
        unpack(&object, &dst).unwrap();
        assert_eq!(snapshot(&src), snapshot(&dst));
    }

    #[test]
    fn test_truncated_object_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        let object = pack(&src, CompressionType::Zstd).unwrap();

        let err = unpack(&object[..object.len() / 2], &tmp.path().join("dst")).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)));
    }

    #[test]
    fn test_parent_dir_entries_are_rejected() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(4);
        header.set_mode(0o644);
        // Bypass the builder's own path checks.
        header.as_old_mut().name[..9].copy_from_slice(b"../escape");
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();
        let tarball = builder.into_inner().unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dst");
        let err = extract_archive(Cursor::new(tarball), &dest).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)));
        assert!(!tmp.path().join("escape").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_twice_over_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("pkg/mod")).unwrap();
        fs::write(src.join("pkg/mod/go.sum"), "h1:abc").unwrap();
        fs::set_permissions(src.join("pkg/mod/go.sum"), fs::Permissions::from_mode(0o444)).unwrap();
        fs::set_permissions(src.join("pkg/mod"), fs::Permissions::from_mode(0o555)).unwrap();
        let object = pack(&src, CompressionType::Zstd).unwrap();

        unpack(&object, &dst).unwrap();
        unpack(&object, &dst).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&dst.join("pkg/mod")), 0o555);
        assert_eq!(mode(&dst.join("pkg/mod/go.sum")), 0o444);
        assert_eq!(fs::read_to_string(dst.join("pkg/mod/go.sum")).unwrap(), "h1:abc");

        for dir in [src.join("pkg/mod"), dst.join("pkg/mod")] {
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_destination_root_keeps_its_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "cached").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("a.txt"), "stale").unwrap();
        fs::set_permissions(&dst, fs::Permissions::from_mode(0o555)).unwrap();

        unpack(&pack(&src, CompressionType::Gzip).unwrap(), &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "cached");
        assert_eq!(
            fs::metadata(&dst).unwrap().permissions().mode() & 0o7777,
            0o555
        );
        fs::set_permissions(&dst, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_stale_file_where_directory_belongs_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("x")).unwrap();
        fs::write(src.join("x/y"), "nested").unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();

        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("x"), "i used to be a file").unwrap();
        fs::write(dst.join("empty"), "so did i").unwrap();

        unpack(&pack(&src, CompressionType::Zstd).unwrap(), &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("x/y")).unwrap(), "nested");
        assert!(dst.join("empty").is_dir());
    }

    #[test]
    fn test_stale_directory_where_file_belongs_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("lock"), "v2").unwrap();

        fs::create_dir_all(dst.join("lock/inner")).unwrap();
        fs::write(dst.join("lock/inner/old"), "v1").unwrap();

        unpack(&pack(&src, CompressionType::Lz4).unwrap(), &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("lock")).unwrap(), "v2");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_parent_is_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        let elsewhere = tmp.path().join("elsewhere");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file"), "cached").unwrap();

        fs::create_dir_all(&dst).unwrap();
        fs::create_dir_all(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, dst.join("sub")).unwrap();

        unpack(&pack(&src, CompressionType::Zstd).unwrap(), &dst).unwrap();

        assert!(fs::symlink_metadata(dst.join("sub")).unwrap().is_dir());
        assert_eq!(fs::read_to_string(dst.join("sub/file")).unwrap(), "cached");
        assert!(!elsewhere.join("file").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_is_a_filesystem_error() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("ok.txt"), "fine").unwrap();
        let secret = src.join("secret.key");
        fs::write(&secret, "hidden").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through the mode bits.
        if fs::read(&secret).is_ok() {
            return;
        }

        let err = pack(&src, CompressionType::Zstd).unwrap_err();
        match err {
            Error::Filesystem { path, source } => {
                assert_eq!(path, secret);
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_sized_reader_matches_header_size() {
        let mut out = Vec::new();
        SizedReader::new(&b"grown since stat"[..], 5)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"grown");

        let mut out = Vec::new();
        SizedReader::new(&b"abc"[..], 6).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc\0\0\0");
    }

    #[test]
    fn test_large_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        let content: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        fs::write(src.join("blob.bin"), &content).unwrap();

        let staged = tempfile::tempfile().unwrap();
        let (mut staged, info) = archive(&src, CompressionType::Zstd, staged).unwrap();
        assert!(info.bytes < content.len() as u64);
        staged.rewind().unwrap();
        extract(staged, &dst).unwrap();

        assert_eq!(fs::read(dst.join("blob.bin")).unwrap(), content);
    }
}
