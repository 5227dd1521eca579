use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "DAYVAULT_CACHE_DIR";

/// Cache-root configuration. Resolved once at construction; the store built
/// from it shares the root immutably across threads.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
}

impl CacheConfig {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Environment override first, then the platform data directory.
    pub fn resolve() -> Self {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Self::new(dir);
            }
        }

        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dayvault");
        Self::new(root)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root() {
        let config = CacheConfig::new("/tmp/dayvault-test");
        assert_eq!(config.root, PathBuf::from("/tmp/dayvault-test"));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var(CACHE_DIR_ENV, "/tmp/dayvault-env");
        let config = CacheConfig::resolve();
        std::env::remove_var(CACHE_DIR_ENV);
        assert_eq!(config.root, PathBuf::from("/tmp/dayvault-env"));
    }
}
