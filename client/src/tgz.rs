use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use modelx_types::{Digest, Digester};

use crate::error::Result;

/// Archive a directory into a deterministic gzip-compressed tar stream,
/// returning the digest of the compressed bytes. When `into` is given the
/// stream is also written to that file.
///
/// Determinism: entries are walked in sorted order, permission bits are
/// preserved, ownership and timestamps are cleared, and the gzip header
/// carries no modification time. The same directory content always produces
/// the same digest.
pub fn tgz_sync(dir: &Path, into: Option<&Path>) -> io::Result<Digest> {
    let mut digester = Digester::new();
    let file = match into {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(File::create(path)?)
        }
        None => None,
    };

    {
        let tee = Tee {
            digester: &mut digester,
            file,
        };
        let encoder = GzEncoder::new(tee, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_dir(&mut builder, dir, Path::new(""))?;
        let encoder = builder.into_inner()?;
        let mut tee = encoder.finish()?;
        tee.flush()?;
    }

    Ok(digester.finish())
}

fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    relative: &Path,
) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = entry.metadata()?;
        let rel = relative.join(entry.file_name());
        if metadata.is_dir() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(mode_of(&metadata));
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, with_trailing_slash(&rel), io::empty())?;
            append_dir(builder, &path, &rel)?;
        } else if metadata.is_file() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            header.set_mode(mode_of(&metadata));
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, &rel, File::open(&path)?)?;
        }
        // symlinks and special files are not part of the model format
    }
    Ok(())
}

fn with_trailing_slash(path: &Path) -> PathBuf {
    let mut s = path.to_path_buf().into_os_string();
    s.push("/");
    PathBuf::from(s)
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Extract a gzip-compressed tar stream into `into_dir`, preserving entry
/// permission bits.
pub fn untgz_sync<R: Read>(reader: R, into_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(into_dir)?;
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(true);
    archive.unpack(into_dir)
}

/// Async wrapper around [`tgz_sync`].
pub async fn tgz(dir: PathBuf, into: Option<PathBuf>) -> Result<Digest> {
    Ok(tokio::task::spawn_blocking(move || tgz_sync(&dir, into.as_deref()))
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??)
}

/// Tees archive bytes into the digester and, optionally, a cache file.
struct Tee<'d> {
    digester: &'d mut Digester,
    file: Option<File>,
}

impl Write for Tee<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.digester.update(buf);
        if let Some(file) = &mut self.file {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.file {
            file.flush()?;
        }
        Ok(())
    }
}
