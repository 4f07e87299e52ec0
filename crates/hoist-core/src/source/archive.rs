//! Zip uploads as a deployment source.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;

use crate::types::ChangeSet;

/// Replace `dest` with the contents of `archive`.
///
/// The change set id is the BLAKE3 hash of the archive, so uploading the same
/// bytes twice maps onto the same deployment.
pub fn extract_archive(archive: &Path, dest: &Path) -> anyhow::Result<ChangeSet> {
    let data = std::fs::read(archive)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let id = blake3::hash(&data).to_hex().to_string();

    if dest.exists() {
        std::fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to clear extract directory: {}", dest.display()))?;
    }
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create extract directory: {}", dest.display()))?;

    let cursor = std::io::Cursor::new(data);
    let mut zip = zip::ZipArchive::new(cursor)
        .with_context(|| format!("Failed to read zip archive: {}", archive.display()))?;

    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .with_context(|| format!("Failed to read zip entry {}", i))?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => {
                tracing::warn!(entry = file.name(), "skipping zip entry with unsafe path");
                continue;
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("Failed to create directory: {}", outpath.display()))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read zip entry: {}", file.name()))?;
        let mut outfile = std::fs::File::create(&outpath)
            .with_context(|| format!("Failed to create file: {}", outpath.display()))?;
        outfile
            .write_all(&buffer)
            .with_context(|| format!("Failed to write file: {}", outpath.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    let name = archive
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(ChangeSet::new(id, "", format!("Deployed from {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_nested_files_and_hashes_content() {
        let temp = tempfile::TempDir::new().unwrap();
        let archive = temp.path().join("site.zip");
        write_zip(&archive, &[("index.html", "<h1>hi</h1>"), ("css/site.css", "body{}")]);

        let dest = temp.path().join("out");
        let change_set = extract_archive(&archive, &dest).unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("css/site.css")).unwrap(),
            "body{}"
        );
        assert_eq!(change_set.id.len(), 64);
        assert_eq!(change_set.message, "Deployed from site.zip");

        let again = extract_archive(&archive, &dest).unwrap();
        assert_eq!(again.id, change_set.id);
    }

    #[test]
    fn previous_contents_are_replaced() {
        let temp = tempfile::TempDir::new().unwrap();
        let dest = temp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.txt"), "old").unwrap();

        let archive = temp.path().join("site.zip");
        write_zip(&archive, &[("index.html", "new")]);
        extract_archive(&archive, &dest).unwrap();

        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("index.html").exists());
    }

    #[test]
    fn unsafe_entries_are_skipped() {
        let temp = tempfile::TempDir::new().unwrap();
        let archive = temp.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", "x"), ("ok.txt", "y")]);

        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();

        assert!(!temp.path().join("escape.txt").exists());
        assert!(dest.join("ok.txt").exists());
    }

    #[test]
    fn invalid_archive_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let archive = temp.path().join("bad.zip");
        std::fs::write(&archive, b"not a zip").unwrap();

        assert!(extract_archive(&archive, &temp.path().join("out")).is_err());
    }
}
