use crate::tracker::JobKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a dropped file asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    TorrentFile,
    Magnet,
    Nzb,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "torrent" => Some(SourceKind::TorrentFile),
            "magnet" => Some(SourceKind::Magnet),
            "nzb" => Some(SourceKind::Nzb),
            _ => None,
        }
    }

    pub fn job_kind(&self) -> JobKind {
        match self {
            SourceKind::TorrentFile | SourceKind::Magnet => JobKind::Torrent,
            SourceKind::Nzb => JobKind::Usenet,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WatchFile {
    pub path: PathBuf,
    pub kind: SourceKind,
    /// File stem, used as the job's display name.
    pub name: String,
    pub file_name: String,
}

impl WatchFile {
    pub fn from_path(path: &Path) -> Option<Self> {
        let kind = SourceKind::from_path(path)?;
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        Some(Self {
            path: path.to_path_buf(),
            kind,
            name,
            file_name,
        })
    }
}

/// Lists the job files sitting directly in `dir`, in name order.
pub fn scan(dir: &Path) -> Result<Vec<WatchFile>, walkdir::Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(file) = WatchFile::from_path(entry.path()) {
            files.push(file);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_source_kind_is_case_insensitive() {
        assert_eq!(
            SourceKind::from_path(Path::new("a.TORRENT")),
            Some(SourceKind::TorrentFile)
        );
        assert_eq!(
            SourceKind::from_path(Path::new("a.Magnet")),
            Some(SourceKind::Magnet)
        );
        assert_eq!(
            SourceKind::from_path(Path::new("a.NZB")),
            Some(SourceKind::Nzb)
        );
        assert_eq!(SourceKind::from_path(Path::new("a.txt")), None);
        assert_eq!(SourceKind::from_path(Path::new("torrent")), None);
    }

    #[test]
    fn test_job_kind_mapping() {
        assert_eq!(SourceKind::TorrentFile.job_kind(), JobKind::Torrent);
        assert_eq!(SourceKind::Magnet.job_kind(), JobKind::Torrent);
        assert_eq!(SourceKind::Nzb.job_kind(), JobKind::Usenet);
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.nzb"), "nzb").unwrap();
        fs::write(dir.path().join("a.torrent"), "t").unwrap();
        fs::write(dir.path().join("c.magnet"), "magnet:?xt=").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(dir.path().join("sub.torrent")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.torrent"), "t").unwrap();

        let files = scan(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.torrent", "b.nzb", "c.magnet"]);
        assert_eq!(files[0].name, "a");
        assert_eq!(files[1].kind, SourceKind::Nzb);
        assert_eq!(files[2].kind, SourceKind::Magnet);
    }

    #[test]
    fn test_scan_missing_dir_fails() {
        let dir = tempdir().unwrap();
        assert!(scan(&dir.path().join("gone")).is_err());
    }
}
