//! Transaction marker repository
//!
//! Every page touched by an open transaction is represented by one file in the marker
//! directory:
//!
//! ```text
//! <file-name>.<page>.uncommitted   full contents of a mutated page
//! <file-name>.<page>.deleted       empty; the committed page no longer exists
//! <file-name>.commit               empty; a commit is in progress
//! ```
//!
//! Together with the committed file length, the set of markers is the only source of
//! truth for the logical page layout after a reopen.

use crate::error::{PlexusError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const UNCOMMITTED_EXTENSION: &str = "uncommitted";
const DELETED_EXTENSION: &str = "deleted";
const COMMIT_EXTENSION: &str = "commit";

/// Kind of per-page marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerType {
    /// Page was mutated; marker holds its new contents
    UncommittedPage,
    /// Committed page was removed
    DeletedPage,
}

impl MarkerType {
    fn extension(self) -> &'static str {
        match self {
            MarkerType::UncommittedPage => UNCOMMITTED_EXTENSION,
            MarkerType::DeletedPage => DELETED_EXTENSION,
        }
    }

    fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            UNCOMMITTED_EXTENSION => Some(MarkerType::UncommittedPage),
            DELETED_EXTENSION => Some(MarkerType::DeletedPage),
            _ => None,
        }
    }
}

/// Marker files for one transactional file
#[derive(Debug)]
pub struct MarkerRepository {
    dir: PathBuf,
    file_name: String,
    uncommitted: BTreeSet<usize>,
    deleted: BTreeSet<usize>,
}

impl MarkerRepository {
    /// Open the marker directory (creating it if needed) and scan existing markers
    pub fn open<P: AsRef<Path>>(dir: P, file_name: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        let mut repo = MarkerRepository {
            dir,
            file_name: file_name.to_string(),
            uncommitted: BTreeSet::new(),
            deleted: BTreeSet::new(),
        };
        repo.scan()?;
        Ok(repo)
    }

    /// Deterministic marker path for `(page, marker_type)`
    pub fn marker_path(&self, page: usize, marker_type: MarkerType) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", self.file_name, page, marker_type.extension()))
    }

    pub fn commit_marker_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.file_name, COMMIT_EXTENSION))
    }

    /// Parse a marker file name belonging to this repository
    pub fn parse_marker_name(&self, name: &str) -> Option<(usize, MarkerType)> {
        let rest = name.strip_prefix(&self.file_name)?.strip_prefix('.')?;
        let (page, extension) = rest.split_once('.')?;
        let marker_type = MarkerType::from_extension(extension)?;
        page.parse().ok().map(|page| (page, marker_type))
    }

    fn scan(&mut self) -> Result<()> {
        self.uncommitted.clear();
        self.deleted.clear();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match self.parse_marker_name(name) {
                Some((page, MarkerType::UncommittedPage)) => {
                    self.uncommitted.insert(page);
                }
                Some((page, MarkerType::DeletedPage)) => {
                    self.deleted.insert(page);
                }
                None => {}
            }
        }

        if let Some(page) = self.uncommitted.intersection(&self.deleted).next() {
            return Err(PlexusError::CorruptMarkers(format!(
                "page {} is marked both uncommitted and deleted",
                page
            )));
        }
        Ok(())
    }

    pub fn has_marker(&self, page: usize, marker_type: MarkerType) -> bool {
        match marker_type {
            MarkerType::UncommittedPage => self.uncommitted.contains(&page),
            MarkerType::DeletedPage => self.deleted.contains(&page),
        }
    }

    /// Lowest page carrying a delete marker
    pub fn lowest_deleted_page(&self) -> Option<usize> {
        self.deleted.iter().next().copied()
    }

    /// Highest page carrying an uncommitted marker
    pub fn highest_changed_page(&self) -> Option<usize> {
        self.uncommitted.iter().next_back().copied()
    }

    /// Uncommitted pages in ascending order
    pub fn changed_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.uncommitted.iter().copied()
    }

    pub fn has_markers(&self) -> bool {
        !self.uncommitted.is_empty() || !self.deleted.is_empty()
    }

    pub fn read_uncommitted(&self, page: usize) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.marker_path(page, MarkerType::UncommittedPage))?)
    }

    pub fn uncommitted_len(&self, page: usize) -> Result<usize> {
        let metadata = std::fs::metadata(self.marker_path(page, MarkerType::UncommittedPage))?;
        Ok(metadata.len() as usize)
    }

    /// Store the new contents of a page (clearing any delete marker for it)
    pub fn write_uncommitted(&mut self, page: usize, data: &[u8]) -> Result<()> {
        std::fs::write(self.marker_path(page, MarkerType::UncommittedPage), data)?;
        self.uncommitted.insert(page);
        self.remove(page, MarkerType::DeletedPage)
    }

    pub fn mark_deleted(&mut self, page: usize) -> Result<()> {
        self.remove(page, MarkerType::UncommittedPage)?;
        std::fs::write(self.marker_path(page, MarkerType::DeletedPage), [])?;
        self.deleted.insert(page);
        Ok(())
    }

    pub fn remove(&mut self, page: usize, marker_type: MarkerType) -> Result<()> {
        let present = match marker_type {
            MarkerType::UncommittedPage => self.uncommitted.remove(&page),
            MarkerType::DeletedPage => self.deleted.remove(&page),
        };
        if present {
            let path = self.marker_path(page, marker_type);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Remove every page marker
    pub fn clear(&mut self) -> Result<()> {
        let uncommitted: Vec<_> = self.uncommitted.iter().copied().collect();
        for page in uncommitted {
            self.remove(page, MarkerType::UncommittedPage)?;
        }
        let deleted: Vec<_> = self.deleted.iter().copied().collect();
        for page in deleted {
            self.remove(page, MarkerType::DeletedPage)?;
        }
        Ok(())
    }

    pub fn begin_commit(&self) -> Result<()> {
        std::fs::write(self.commit_marker_path(), [])?;
        Ok(())
    }

    pub fn end_commit(&self) -> Result<()> {
        let path = self.commit_marker_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn commit_in_progress(&self) -> bool {
        self.commit_marker_path().exists()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_names_are_deterministic() {
        let dir = TempDir::new().unwrap();
        let repo = MarkerRepository::open(dir.path(), "data.bin").unwrap();

        let path = repo.marker_path(12, MarkerType::UncommittedPage);
        assert_eq!(path.file_name().unwrap(), "data.bin.12.uncommitted");
        assert_eq!(
            repo.parse_marker_name("data.bin.12.uncommitted"),
            Some((12, MarkerType::UncommittedPage))
        );
        assert_eq!(
            repo.parse_marker_name("data.bin.3.deleted"),
            Some((3, MarkerType::DeletedPage))
        );
        assert_eq!(repo.parse_marker_name("other.bin.3.deleted"), None);
        assert_eq!(repo.parse_marker_name("data.bin.x.deleted"), None);
        assert_eq!(repo.parse_marker_name("data.bin.commit"), None);
    }

    #[test]
    fn test_scan_recovers_markers() {
        let dir = TempDir::new().unwrap();
        {
            let mut repo = MarkerRepository::open(dir.path(), "f").unwrap();
            repo.write_uncommitted(0, b"abc").unwrap();
            repo.write_uncommitted(4, b"xyz").unwrap();
            repo.mark_deleted(6).unwrap();
            repo.mark_deleted(7).unwrap();
        }

        let repo = MarkerRepository::open(dir.path(), "f").unwrap();
        assert_eq!(repo.highest_changed_page(), Some(4));
        assert_eq!(repo.lowest_deleted_page(), Some(6));
        assert_eq!(repo.read_uncommitted(4).unwrap(), b"xyz");
        assert_eq!(repo.uncommitted_len(0).unwrap(), 3);
    }

    #[test]
    fn test_rewriting_deleted_page_clears_delete_marker() {
        let dir = TempDir::new().unwrap();
        let mut repo = MarkerRepository::open(dir.path(), "f").unwrap();
        repo.mark_deleted(2).unwrap();
        repo.write_uncommitted(2, b"again").unwrap();

        assert!(!repo.has_marker(2, MarkerType::DeletedPage));
        assert!(repo.has_marker(2, MarkerType::UncommittedPage));
        assert!(!repo.marker_path(2, MarkerType::DeletedPage).exists());

        repo.clear().unwrap();
        assert!(!repo.has_markers());
    }
}
