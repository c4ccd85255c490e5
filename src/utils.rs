use std::{
    fs,
    path::{Path, PathBuf},
};

pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "mov", "webm", "wmv"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|v| v.eq_ignore_ascii_case(ext))
        })
}

pub fn walk_recursive<F>(folder: &Path, filter_fn: Option<F>) -> Result<Vec<PathBuf>, std::io::Error>
where
    F: Fn(&Path) -> bool + Copy,
{
    let mut local_paths = Vec::new();
    let dir = fs::read_dir(folder)?;
    for file in dir {
        let path = file?.path();
        if path.is_file() {
            if let Some(filter_fn) = filter_fn {
                if filter_fn(&path) {
                    local_paths.push(path);
                }
            } else {
                local_paths.push(path);
            }
        } else if path.is_dir() {
            local_paths.append(walk_recursive(&path, filter_fn)?.as_mut());
        }
    }
    Ok(local_paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_extensions() {
        assert!(is_video_file(Path::new("/dl/Movie.2024.1080p.mkv")));
        assert!(is_video_file(Path::new("/dl/Movie.MP4")));
        assert!(!is_video_file(Path::new("/dl/Movie.nfo")));
        assert!(!is_video_file(Path::new("/dl/sample")));
    }
}
