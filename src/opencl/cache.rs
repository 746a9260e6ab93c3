//! 程序二进制缓存
//!
//! 每个设备标识 + inverse size 对应一个缓存文件。读取失败或文件损坏只算未命中。

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

/// 磁盘上的程序缓存
#[derive(Debug, Clone)]
pub struct ProgramCache {
    dir: PathBuf,
    enabled: bool,
}

impl ProgramCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    /// 不读也不写缓存
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::from("."),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `cache-opencl.<inverse_size>.<identity>`
    pub fn path_for(&self, inverse_size: usize, identity: &str) -> PathBuf {
        self.dir
            .join(format!("cache-opencl.{}.{}", inverse_size, identity))
    }

    pub fn load(&self, inverse_size: usize, identity: &str) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        let path = self.path_for(inverse_size, identity);
        match fs::read(&path) {
            Ok(binary) if !binary.is_empty() => {
                info!("Loading cached program {}", path.display());
                Some(binary)
            }
            Ok(_) => {
                debug!("cache file {} is empty", path.display());
                None
            }
            Err(e) => {
                debug!("cache miss {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 写入失败只告警
    pub fn store(&self, inverse_size: usize, identity: &str, binary: &[u8]) {
        if !self.enabled || binary.is_empty() {
            return;
        }
        let path = self.path_for(inverse_size, identity);
        let result = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, binary));
        match result {
            Ok(()) => info!("Program binary cached to {}", path.display()),
            Err(e) => warn!("failed to write program cache {}: {}", path.display(), e),
        }
    }

    /// 缓存文件被设备拒绝后删除，下次运行重新编译
    pub fn invalidate(&self, inverse_size: usize, identity: &str) {
        let path = self.path_for(inverse_size, identity);
        if let Err(e) = fs::remove_file(&path) {
            debug!("could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_trip_and_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProgramCache::new(dir.path());
        assert!(cache.load(255, "abcd").is_none());

        cache.store(255, "abcd", b"binary");
        assert!(dir.path().join("cache-opencl.255.abcd").is_file());
        assert_eq!(cache.load(255, "abcd").unwrap(), b"binary".to_vec());
        // inverse size 不同则不命中
        assert!(cache.load(128, "abcd").is_none());

        cache.invalidate(255, "abcd");
        assert!(cache.load(255, "abcd").is_none());
    }

    #[test]
    fn test_disabled_cache_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProgramCache::new(dir.path());
        cache.store(255, "abcd", b"binary");

        let disabled = ProgramCache {
            dir: dir.path().to_path_buf(),
            enabled: false,
        };
        assert!(disabled.load(255, "abcd").is_none());
        disabled.store(255, "efgh", b"binary");
        assert!(!dir.path().join("cache-opencl.255.efgh").exists());
    }

    #[test]
    fn test_unwritable_dir_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        ProgramCache::new(&blocker).store(255, "abcd", b"binary");
    }
}
