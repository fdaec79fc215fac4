//! The local music folder as an ordered track list.
//!
//! This is a read-only view: the folder is rescanned on demand and the
//! result is handed to the player. Downloads land in the same folder, so a
//! finished acquisition shows up on the next [`read_tracks`] call.

use std::path::{Path, PathBuf};

use crate::scanner;

/// A playable file in the music folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFile {
    /// File name without extension, used for display
    pub name: String,
    /// Full path to the file
    pub path: PathBuf,
    /// File name including extension
    pub file_name: String,
}

impl TrackFile {
    /// Build a track record from a file path.
    pub fn from_path(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());
        Self {
            name,
            path,
            file_name,
        }
    }
}

/// Scans `dir` and returns its tracks sorted by file name.
///
/// A missing directory is not an error; it simply has no tracks.
pub fn read_tracks(dir: &Path) -> std::io::Result<Vec<TrackFile>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Music directory missing, library is empty");
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut tracks: Vec<TrackFile> = scanner::scan(dir).map(TrackFile::from_path).collect();
    tracks.sort_by_key(|t| t.file_name.to_lowercase());
    Ok(tracks)
}

/// Normalise a name for loose comparison: lowercase, extension removed.
fn normalize(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let path = Path::new(&lower);
    if scanner::is_audio_file(path) {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(lower)
    } else {
        lower
    }
}

/// Whether a track similar to `name` already exists among `tracks`.
///
/// Matches ignore case and extension, and accept an existing name that
/// contains the searched one.
pub fn contains_similar(tracks: &[TrackFile], name: &str) -> bool {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return false;
    }
    tracks.iter().any(|t| {
        let existing = t.name.to_lowercase();
        existing == wanted || existing.contains(&wanted)
    })
}

/// Find a track by its display name (case-insensitive, exact).
pub fn find_by_name<'a>(tracks: &'a [TrackFile], name: &str) -> Option<&'a TrackFile> {
    let wanted = name.to_lowercase();
    tracks.iter().find(|t| t.name.to_lowercase() == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn track(name: &str) -> TrackFile {
        TrackFile::from_path(PathBuf::from(format!("/music/{name}.mp3")))
    }

    #[test]
    fn test_track_from_path() {
        let t = TrackFile::from_path(PathBuf::from("/music/My Song.mp3"));
        assert_eq!(t.name, "My Song");
        assert_eq!(t.file_name, "My Song.mp3");
    }

    #[test]
    fn test_read_tracks_sorted() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("b.mp3")).unwrap();
        File::create(dir.path().join("A.mp3")).unwrap();
        File::create(dir.path().join("c.txt")).unwrap();

        let tracks = read_tracks(dir.path()).unwrap();
        let names: Vec<&str> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["A", "b"]);
    }

    #[test]
    fn test_read_tracks_missing_dir() {
        let dir = tempdir().unwrap();
        let tracks = read_tracks(&dir.path().join("Music")).unwrap();
        assert!(tracks.is_empty());
    }

    #[test]
    fn test_contains_similar() {
        let tracks = vec![track("Daft Punk - Around The World (Official Audio)")];
        assert!(contains_similar(&tracks, "daft punk - around the world"));
        assert!(contains_similar(&tracks, "Daft Punk - Around The World (Official Audio).mp3"));
        assert!(!contains_similar(&tracks, "Justice - D.A.N.C.E."));
        assert!(!contains_similar(&tracks, "   "));
    }

    #[test]
    fn test_find_by_name() {
        let tracks = vec![track("One"), track("Two")];
        assert_eq!(find_by_name(&tracks, "two").map(|t| t.name.as_str()), Some("Two"));
        assert!(find_by_name(&tracks, "Tw").is_none());
    }
}
