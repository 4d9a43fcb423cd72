//! Compiled shader binary cache with injectable storage.

use std::collections::HashMap;
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use fnv::FnvHasher;

use crate::backend::ShaderStage;
use crate::error::ShaderError;

/// Backing store for compiled SPIR-V keyed by [`cache_key`]
pub trait CacheStorage: Send {
    fn load(&self, key: u64) -> Result<Option<Vec<u32>>, ShaderError>;

    fn store(&mut self, key: u64, binary: &[u32]) -> Result<(), ShaderError>;
}

/// Key of a compiled stage: source text, stage and entry point.
///
/// FNV-1a over the raw bytes, so keys of a [`DirectoryStorage`] stay valid
/// across processes, toolchains and platforms.
pub fn cache_key(source: &str, stage: ShaderStage, entry_point: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(source.as_bytes());
    hasher.write_u8(0xff);
    hasher.write_u8(stage as u8);
    hasher.write(entry_point.as_bytes());
    hasher.write_u8(0xff);
    hasher.finish()
}

/// Process lifetime storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<u64, Vec<u32>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStorage for MemoryStorage {
    fn load(&self, key: u64) -> Result<Option<Vec<u32>>, ShaderError> {
        Ok(self.entries.get(&key).cloned())
    }

    fn store(&mut self, key: u64, binary: &[u32]) -> Result<(), ShaderError> {
        self.entries.insert(key, binary.to_vec());
        Ok(())
    }
}

/// One `<key>.spv` file per entry in a directory
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ShaderError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            ShaderError::CacheStorage(format!("creating {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: u64) -> PathBuf {
        self.root.join(format!("{key:016x}.spv"))
    }
}

impl CacheStorage for DirectoryStorage {
    fn load(&self, key: u64) -> Result<Option<Vec<u32>>, ShaderError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .map_err(|e| ShaderError::CacheStorage(format!("reading {}: {e}", path.display())))?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            log::warn!("Ignoring corrupted shader cache entry {}", path.display());
            return Ok(None);
        }
        Ok(Some(bytemuck::pod_collect_to_vec(&bytes)))
    }

    fn store(&mut self, key: u64, binary: &[u32]) -> Result<(), ShaderError> {
        let path = self.path(key);
        fs::write(&path, bytemuck::cast_slice::<u32, u8>(binary))
            .map_err(|e| ShaderError::CacheStorage(format!("writing {}: {e}", path.display())))
    }
}

/// Shader binary cache owned by a [`super::ShaderCompiler`]
pub struct ShaderBinaryCache {
    storage: Box<dyn CacheStorage>,
    hits: u64,
    misses: u64,
}

impl std::fmt::Debug for ShaderBinaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderBinaryCache")
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl Default for ShaderBinaryCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ShaderBinaryCache {
    pub fn new(storage: Box<dyn CacheStorage>) -> Self {
        Self {
            storage,
            hits: 0,
            misses: 0,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    pub fn in_directory(root: impl Into<PathBuf>) -> Result<Self, ShaderError> {
        Ok(Self::new(Box::new(DirectoryStorage::new(root)?)))
    }

    /// Look up a binary, counting the hit or miss. Storage failures count as misses.
    pub fn get(&mut self, key: u64) -> Option<Vec<u32>> {
        match self.storage.load(key) {
            Ok(Some(binary)) => {
                self.hits += 1;
                Some(binary)
            }
            Ok(None) => {
                self.misses += 1;
                None
            }
            Err(err) => {
                log::warn!("Shader cache lookup failed: {}", err);
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: u64, binary: &[u32]) {
        if let Err(err) = self.storage.store(key, binary) {
            log::warn!("Failed to store compiled shader: {}", err);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!(
            "stimulus-shader-cache-{tag}-{}-{nanos}",
            std::process::id()
        ))
    }

    #[test]
    fn test_key_depends_on_stage_and_entry() {
        let a = cache_key("src", ShaderStage::Vertex, "main");
        assert_eq!(a, cache_key("src", ShaderStage::Vertex, "main"));
        assert_ne!(a, cache_key("src", ShaderStage::Fragment, "main"));
        assert_ne!(a, cache_key("src", ShaderStage::Vertex, "other"));
        assert_ne!(a, cache_key("src2", ShaderStage::Vertex, "main"));
        assert_ne!(a, cache_key("srcm", ShaderStage::Vertex, "ain"));
    }

    #[test]
    fn test_key_is_fixed_fnv1a() {
        // Empty source and entry point leave only the separators and the stage byte
        let mut expected: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in [0xffu8, ShaderStage::Fragment as u8, 0xff] {
            expected ^= u64::from(byte);
            expected = expected.wrapping_mul(0x0000_0100_0000_01b3);
        }
        assert_eq!(cache_key("", ShaderStage::Fragment, ""), expected);
    }

    #[test]
    fn test_memory_cache_counts() {
        let mut cache = ShaderBinaryCache::in_memory();
        assert!(cache.get(1).is_none());
        cache.insert(1, &[0x0723_0203, 7]);
        assert_eq!(cache.get(1), Some(vec![0x0723_0203, 7]));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_directory_storage_survives_new_cache() {
        let dir = unique_dir("persist");
        {
            let mut cache = ShaderBinaryCache::in_directory(&dir).unwrap();
            cache.insert(42, &[1, 2, 3]);
        }
        let mut cache = ShaderBinaryCache::in_directory(&dir).unwrap();
        assert_eq!(cache.get(42), Some(vec![1, 2, 3]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_directory_storage_ignores_truncated_entry() {
        let dir = unique_dir("corrupt");
        let storage = DirectoryStorage::new(&dir).unwrap();
        fs::write(storage.path(9), [1u8, 2, 3]).unwrap();
        assert_eq!(storage.load(9).unwrap(), None);
        let _ = fs::remove_dir_all(&dir);
    }
}
