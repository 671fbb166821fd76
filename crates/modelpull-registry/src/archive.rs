//! Staging-to-archive packaging.
//!
//! Walks the `models/` subtree of a staging directory and writes a
//! deflate-compressed zip. Entry names are forward-slash relative paths from
//! the staging root (so they all begin with `models/`); directories are
//! included as explicit entries and unix file modes are preserved. The
//! archive is written to a sibling `.part` file and renamed into place.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::RegistryResult;

/// Copy buffer for file entries.
const COPY_BUF_LEN: usize = 64 * 1024;

/// Package `<staging_root>/models` into `out_zip`.
pub fn pack_staging(staging_root: &Path, out_zip: &Path) -> RegistryResult<()> {
    let models_dir = staging_root.join("models");
    if let Some(parent) = out_zip.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let part_path = out_zip.with_extension("zip.part");
    let file = File::create(&part_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_directory(&mut zip, &models_dir, staging_root, options)?;

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);
    std::fs::rename(&part_path, out_zip)?;
    Ok(())
}

/// Forward-slash relative entry name for a path under `base`.
fn entry_name(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn add_directory<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    base: &Path,
    options: SimpleFileOptions,
) -> RegistryResult<()> {
    zip.add_directory(format!("{}/", entry_name(dir, base)), options)?;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            add_directory(zip, &path, base, options)?;
        } else {
            add_file(zip, &path, base, options)?;
        }
    }
    Ok(())
}

fn add_file<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    path: &Path,
    base: &Path,
    options: SimpleFileOptions,
) -> RegistryResult<()> {
    let mut options = options;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        options = options.unix_permissions(mode & 0o777);
    }

    zip.start_file(entry_name(path, base), options)?;
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; COPY_BUF_LEN];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        zip.write_all(&buf[..n])?;
    }
    Ok(())
}
