use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const INGESTABLE_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// Recursively collect already-converted study documents under `folder`,
/// sorted for reproducible batch ingestion.
pub fn discover_markdown_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let ingestable = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                INGESTABLE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if ingestable {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Default document title from a file name: `laws-of_motion.md` -> `laws of motion`.
pub fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("untitled")
        .replace(['_', '-'], " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("b.md")).and_then(|mut file| file.write_all(b"# B"))?;
        File::create(nested.join("a.txt")).and_then(|mut file| file.write_all(b"A"))?;
        File::create(base.join("skip.pdf")).and_then(|mut file| file.write_all(b"%PDF"))?;

        let files = discover_markdown_files(base);
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|pair| pair[0] <= pair[1]));
        Ok(())
    }

    #[test]
    fn non_markdown_extensions_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("scan.pdf"), b"%PDF")?;
        fs::write(dir.path().join("data.csv"), b"a,b")?;
        assert!(discover_markdown_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn titles_come_from_file_stems() {
        assert_eq!(
            title_from_path(Path::new("/docs/laws-of_motion.md")),
            "laws of motion"
        );
        assert_eq!(title_from_path(Path::new("notes.txt")), "notes");
    }
}
