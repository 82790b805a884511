//! 仿真用设置存储：内存或 JSON 文件

use bmcu_hal::mock::MemoryStore;
use bmcu_hal::{JsonFileStore, SettingsStore, StorageError, StoredSettings};
use std::path::Path;

#[derive(Debug, Clone)]
pub enum SimStore {
    Memory(MemoryStore),
    File(JsonFileStore),
}

impl SimStore {
    pub fn open(path: Option<&Path>) -> Self {
        match path {
            Some(path) => SimStore::File(JsonFileStore::new(path)),
            None => SimStore::Memory(MemoryStore::new()),
        }
    }
}

impl SettingsStore for SimStore {
    fn load(&mut self) -> Result<Option<StoredSettings>, StorageError> {
        match self {
            SimStore::Memory(store) => store.load(),
            SimStore::File(store) => store.load(),
        }
    }

    fn save(&mut self, settings: &StoredSettings) -> Result<(), StorageError> {
        match self {
            SimStore::Memory(store) => store.save(settings),
            SimStore::File(store) => store.save(settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = SimStore::open(Some(&path));
        assert!(store.load().unwrap().is_none());
        store.save(&StoredSettings::default()).unwrap();

        let mut reopened = SimStore::open(Some(&path));
        assert_eq!(reopened.load().unwrap(), Some(StoredSettings::default()));
    }

    #[test]
    fn test_memory_store_starts_empty() {
        let mut store = SimStore::open(None);
        assert!(matches!(store, SimStore::Memory(_)));
        assert!(store.load().unwrap().is_none());
    }
}
