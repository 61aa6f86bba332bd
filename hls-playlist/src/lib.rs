//! Per-event HLS playlist generation.
//!
//! The recording child writes a flat directory of `YYYY-MM-DDTHH-MM-SS.ts`
//! segments. For each motion event this crate materializes a playlist
//! referencing the segments inside a time window. Filenames sort
//! lexicographically in chronological order by construction, so window
//! selection is a plain string comparison.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

/// Timestamp layout shared by segment and playlist filenames.
pub const FILE_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("failed to list segments in {root}: {err}")]
    List { root: PathBuf, err: std::io::Error },

    #[error("failed to write playlist {path}: {err}")]
    Write { path: PathBuf, err: std::io::Error },
}

/// Lists the segment files in `root` whose names fall inside the
/// `[start, end]` window, sorted.
///
/// The whole directory is enumerated on each call. That is O(N) in the total
/// segment count; good enough for a single camera but a candidate for
/// per-day partitioning if roots ever grow very large.
pub fn find_ts_files(
    root: &Path,
    start: DateTime<Local>,
    end: DateTime<Local>,
) -> Result<Vec<String>, PlaylistError> {
    let entries = fs::read_dir(root).map_err(|err| PlaylistError::List {
        root: root.to_path_buf(),
        err,
    })?;
    let s = format!("{}.ts", start.format(FILE_TIME_FORMAT));
    let e = format!("{}.ts", end.format(FILE_TIME_FORMAT));
    let mut out = Vec::new();
    let mut total = 0usize;
    for entry in entries.flatten() {
        total += 1;
        if let Ok(n) = entry.file_name().into_string() {
            if n.ends_with(".ts") && n.as_str() >= s.as_str() && n.as_str() <= e.as_str() {
                out.push(n);
            }
        }
    }
    out.sort();
    tracing::debug!(start = %s, end = %e, total, found = out.len(), "find_ts_files");
    Ok(out)
}

/// Renders the playlist body for the given segment files.
fn render_m3u8(files: &[String]) -> String {
    let mut out = String::from(
        "#EXTM3U\n\
         #EXT-X-VERSION:6\n\
         #EXT-X-ALLOW-CACHE:YES\n\
         #EXT-X-TARGETDURATION:4\n\
         #EXT-X-MEDIA-SEQUENCE:0\n\
         #EXT-X-INDEPENDENT-SEGMENTS\n",
    );
    for f in files {
        out.push_str("#EXTINF:4.000000,\n");
        out.push_str(f);
        out.push('\n');
    }
    out
}

/// Writes `root/<t>.m3u8` covering every segment inside `[start, end]`.
///
/// The file is written to a `.tmp` sibling and renamed into place, so
/// concurrent readers observe either the previous playlist or the complete
/// new one, never a truncated file. Returns the playlist path, or `None`
/// when the window matched no segments (nothing is written then; the caller
/// retries once the encoder has flushed).
pub fn write_playlist(
    root: &Path,
    t: DateTime<Local>,
    start: DateTime<Local>,
    end: DateTime<Local>,
) -> Result<Option<PathBuf>, PlaylistError> {
    let files = find_ts_files(root, start, end)?;
    if files.is_empty() {
        return Ok(None);
    }
    let name = root.join(format!("{}.m3u8", t.format(FILE_TIME_FORMAT)));
    tracing::debug!(t = %t.format(FILE_TIME_FORMAT), files = files.len(), "write_playlist");
    let tmp = root.join(format!("{}.m3u8.tmp", t.format(FILE_TIME_FORMAT)));
    let write = |p: &Path| -> std::io::Result<()> {
        fs::write(p, render_m3u8(&files))?;
        fs::rename(p, &name)
    };
    write(&tmp).map_err(|err| PlaylistError::Write {
        path: name.clone(),
        err,
    })?;
    Ok(Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_window_selection() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-01-01T00-00-00.ts");
        touch(dir.path(), "2024-01-01T00-00-04.ts");
        touch(dir.path(), "2024-01-01T00-00-08.ts");
        touch(dir.path(), "not-a-segment.txt");

        let files = find_ts_files(dir.path(), local(0, 0, 3), local(0, 0, 7)).unwrap();
        assert_eq!(files, vec!["2024-01-01T00-00-04.ts".to_string()]);
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-01-01T00-00-00.ts");
        touch(dir.path(), "2024-01-01T00-00-04.ts");

        let files = find_ts_files(dir.path(), local(0, 0, 0), local(0, 0, 4)).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_no_match_writes_nothing() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-01-01T00-00-00.ts");

        let out = write_playlist(dir.path(), local(12, 0, 0), local(12, 0, 0), local(12, 0, 30))
            .unwrap();
        assert!(out.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_playlist_contents() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-01-01T00-00-04.ts");
        touch(dir.path(), "2024-01-01T00-00-08.ts");

        let out = write_playlist(dir.path(), local(0, 0, 4), local(0, 0, 4), local(0, 0, 10))
            .unwrap()
            .unwrap();
        assert_eq!(out.file_name().unwrap(), "2024-01-01T00-00-04.m3u8");
        let body = fs::read_to_string(&out).unwrap();
        assert_eq!(
            body,
            "#EXTM3U\n\
             #EXT-X-VERSION:6\n\
             #EXT-X-ALLOW-CACHE:YES\n\
             #EXT-X-TARGETDURATION:4\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-INDEPENDENT-SEGMENTS\n\
             #EXTINF:4.000000,\n\
             2024-01-01T00-00-04.ts\n\
             #EXTINF:4.000000,\n\
             2024-01-01T00-00-08.ts\n"
        );
        // The temporary file must be gone after the rename.
        assert!(!dir.path().join("2024-01-01T00-00-04.m3u8.tmp").exists());
    }

    #[test]
    fn test_rewrite_replaces_previous_playlist() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-01-01T00-00-04.ts");
        write_playlist(dir.path(), local(0, 0, 4), local(0, 0, 4), local(0, 0, 6))
            .unwrap()
            .unwrap();

        touch(dir.path(), "2024-01-01T00-00-08.ts");
        let out = write_playlist(dir.path(), local(0, 0, 4), local(0, 0, 4), local(0, 0, 10))
            .unwrap()
            .unwrap();
        let body = fs::read_to_string(&out).unwrap();
        assert!(body.contains("2024-01-01T00-00-08.ts"));
    }
}
