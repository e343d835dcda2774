use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Per-run caches for the correlator, keyed by absolute path.
///
/// Constructed once per correlation run and shared by reference across the
/// worker pool. Reads dominate; writes go through the mutex. A race between
/// two workers computing the same entry is harmless — the computations are
/// pure, so both produce the same value.
#[derive(Debug, Default)]
pub struct CorrelatorCache {
    keys: Mutex<HashMap<PathBuf, String>>,
    dimensions: Mutex<HashMap<PathBuf, (u32, u32)>>,
}

impl CorrelatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached correlation key for a path, computing it on first use.
    pub fn key_for(&self, path: &Path, compute: impl FnOnce() -> String) -> String {
        if let Some(hit) = self.keys.lock().expect("key cache poisoned").get(path) {
            return hit.clone();
        }
        let key = compute();
        self.keys
            .lock()
            .expect("key cache poisoned")
            .insert(path.to_path_buf(), key.clone());
        key
    }

    /// Cached probed dimensions for an artifact, computing on first use.
    /// A probe failure is not cached, so a transiently unreadable file can
    /// succeed on a later run.
    pub fn dimensions_for(
        &self,
        path: &Path,
        compute: impl FnOnce() -> Option<(u32, u32)>,
    ) -> Option<(u32, u32)> {
        if let Some(hit) = self
            .dimensions
            .lock()
            .expect("dimension cache poisoned")
            .get(path)
        {
            return Some(*hit);
        }
        let dims = compute()?;
        self.dimensions
            .lock()
            .expect("dimension cache poisoned")
            .insert(path.to_path_buf(), dims);
        Some(dims)
    }

    #[cfg(test)]
    pub fn key_entries(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn key_computed_once() {
        let cache = CorrelatorCache::new();
        let calls = AtomicU32::new(0);
        let path = Path::new("/abs/sunset.jpg");

        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "sunset".to_string()
        };
        assert_eq!(cache.key_for(path, compute), "sunset");
        assert_eq!(
            cache.key_for(path, || unreachable!("must hit the cache")),
            "sunset"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.key_entries(), 1);
    }

    #[test]
    fn failed_dimension_probe_is_not_cached() {
        let cache = CorrelatorCache::new();
        let path = Path::new("/abs/clip.mp4");

        assert_eq!(cache.dimensions_for(path, || None), None);
        // Second probe runs again and can succeed.
        assert_eq!(cache.dimensions_for(path, || Some((640, 480))), Some((640, 480)));
        assert_eq!(cache.dimensions_for(path, || None), Some((640, 480)));
    }
}
