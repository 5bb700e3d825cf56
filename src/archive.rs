//! Build context archiving.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

/// Pack `dir` into a tar archive held in a temporary file.
///
/// Entry paths are relative to `dir` (the root itself is not an entry), sorted
/// by name, and symlinks are stored as links rather than followed.
pub fn pack(dir: &Path) -> io::Result<NamedTempFile> {
    let tmp = tempfile::Builder::new()
        .prefix("derivebox-context-")
        .suffix(".tar")
        .tempfile()?;
    let mut builder = tar::Builder::new(tmp.reopen()?);
    builder.follow_symlinks(false);

    let mut count = 0usize;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        builder.append_path_with_name(entry.path(), rel)?;
        count += 1;
    }
    let mut file = builder.into_inner()?;
    file.flush()?;
    debug!(dir = %dir.display(), entries = count, "packed build context");
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entries(tmp: &NamedTempFile) -> Vec<(String, tar::EntryType)> {
        let mut archive = tar::Archive::new(tmp.reopen().expect("reopen"));
        archive
            .entries()
            .expect("entries")
            .map(|e| {
                let e = e.expect("entry");
                (
                    e.path().expect("path").to_string_lossy().into_owned(),
                    e.header().entry_type(),
                )
            })
            .collect()
    }

    #[test]
    fn test_pack_relative_sorted_entries() {
        let td = tempfile::tempdir().expect("tmpdir");
        fs::write(td.path().join("b.txt"), "b").expect("write");
        fs::create_dir(td.path().join("WORKDIR")).expect("mkdir");
        fs::write(td.path().join("WORKDIR").join("a.txt"), "a").expect("write");
        fs::write(td.path().join("Dockerfile"), "FROM scratch\n").expect("write");

        let tmp = pack(td.path()).expect("pack");
        let names: Vec<String> = entries(&tmp).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["Dockerfile", "WORKDIR", "WORKDIR/a.txt", "b.txt"]
        );
    }

    #[test]
    fn test_empty_dir_packs_empty_archive() {
        let td = tempfile::tempdir().expect("tmpdir");
        let tmp = pack(td.path()).expect("pack");
        assert!(entries(&tmp).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_stored_as_link() {
        let td = tempfile::tempdir().expect("tmpdir");
        fs::write(td.path().join("target.txt"), "t").expect("write");
        std::os::unix::fs::symlink("target.txt", td.path().join("link")).expect("symlink");

        let tmp = pack(td.path()).expect("pack");
        let link = entries(&tmp)
            .into_iter()
            .find(|(n, _)| n == "link")
            .expect("link entry");
        assert_eq!(link.1, tar::EntryType::Symlink);
    }

    #[test]
    fn test_missing_dir_errors() {
        let td = tempfile::tempdir().expect("tmpdir");
        assert!(pack(&td.path().join("absent")).is_err());
    }
}
