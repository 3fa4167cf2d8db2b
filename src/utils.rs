use anyhow::Result;
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str)?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Ok(filename.to_string());
            }
        }
    }

    // Fallback if no filename found in path
    Ok(format!("download_{}", Uuid::new_v4()))
}

/// Allocates a fresh holding-file path in the platform temp directory. The
/// file itself is created by the worker's first successful ranged response.
pub fn allocate_holding_path() -> PathBuf {
    std::env::temp_dir().join(format!("pdl-{}.part", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_comes_from_last_path_segment() {
        let name = get_filename_from_url("https://example.com/dir/file.bin?x=1").unwrap();
        assert_eq!(name, "file.bin");
    }

    #[test]
    fn empty_path_falls_back_to_generated_name() {
        let name = get_filename_from_url("https://example.com/").unwrap();
        assert!(name.starts_with("download_"));
    }

    #[test]
    fn holding_paths_are_unique() {
        assert_ne!(allocate_holding_path(), allocate_holding_path());
    }
}
