use std::fs;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;

use super::MonitorError;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirEntryInfo {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
}

/// Lists the entries of `path` sorted by file name.
///
/// # Errors
///
/// - [`MonitorError::ReadDirectory`] if the directory or one of its entries cannot be read
pub(crate) fn list_entries(path: &Path) -> Result<Vec<DirEntryInfo>, Report<MonitorError>> {
    let read_error = || MonitorError::ReadDirectory {
        path: path.to_path_buf(),
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(path).change_context_lazy(read_error)? {
        let entry = entry.change_context_lazy(read_error)?;
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn entries_are_sorted_by_name() {
        let base = tempfile::tempdir().unwrap();
        for name in ["ccc", "aaa", "bbb"] {
            fs::create_dir(base.path().join(name)).unwrap();
        }
        fs::write(base.path().join("a-file"), b"").unwrap();

        let entries = list_entries(base.path()).unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a-file", "aaa", "bbb", "ccc"]);
        assert_eq!(entries[1].path, base.path().join("aaa"));
    }

    #[test]
    fn empty_directory_yields_no_entries() {
        let base = tempfile::tempdir().unwrap();

        assert!(list_entries(base.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("containers");

        let err = list_entries(&missing).unwrap_err();

        assert!(matches!(
            err.current_context(),
            MonitorError::ReadDirectory { path } if path == &missing
        ));
    }
}
