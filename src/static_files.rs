use std::io;
use std::path::{Component, Path, PathBuf};

/// Serves well-known static assets from the public directory.
#[derive(Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base_dir: base.into(),
        }
    }

    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.base_dir.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn content_type(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase()
            .as_str()
        {
            "ico" => "image/x-icon",
            "html" => "text/html",
            "css" => "text/css",
            "js" => "application/javascript",
            "json" => "application/json",
            "png" => "image/png",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }

    pub fn load(&self, url_path: &str) -> io::Result<(Vec<u8>, &'static str)> {
        let path = self
            .map_path(url_path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "invalid path"))?;
        if !path.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        }
        let bytes = std::fs::read(&path)?;
        Ok((bytes, Self::content_type(&path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_path_prevents_traversal() {
        let sf = StaticFiles::new("public");
        assert!(sf.map_path("../Cargo.toml").is_none());
        assert!(sf.map_path("favicon.ico").is_some());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            StaticFiles::content_type(Path::new("favicon.ico")),
            "image/x-icon"
        );
        assert_eq!(
            StaticFiles::content_type(Path::new("x.unknown")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sf = StaticFiles::new(dir.path());
        assert!(sf.load("favicon.ico").is_err());

        std::fs::write(dir.path().join("favicon.ico"), b"\x00\x01icon").unwrap();
        let (bytes, ct) = sf.load("favicon.ico").unwrap();
        assert_eq!(ct, "image/x-icon");
        assert_eq!(bytes, b"\x00\x01icon");
    }
}
