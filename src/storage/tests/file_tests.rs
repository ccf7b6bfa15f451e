#[cfg(test)]
mod tests {
    use crate::error::GuardError;
    use crate::storage::{FileStorage, StorageBackend};

    use super::super::common;

    #[tokio::test]
    async fn test_basic_file_operations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();
        common::test_basic_operations(&storage).await.unwrap();
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let storage = FileStorage::new(&nested).await.unwrap();
        assert_eq!(storage.directory(), nested.as_path());
        storage.set("fallback-data", b"{}").await.unwrap();

        assert!(nested.join("fallback-data.json").exists());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let first = FileStorage::new(dir.path()).await.unwrap();
        first.set("fallback-data", b"{\"users\":[]}").await.unwrap();
        drop(first);

        let second = FileStorage::new(dir.path()).await.unwrap();
        assert_eq!(
            second.get("fallback-data").await.unwrap().as_deref(),
            Some(&b"{\"users\":[]}"[..])
        );
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();

        for key in ["../escape", "a/b", "", ".hidden"] {
            let err = storage.set(key, b"x").await.unwrap_err();
            assert!(matches!(err, GuardError::Storage(_)), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();

        for i in 0..5 {
            storage.set("doc", format!("{}", i).as_bytes()).await.unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }
}
