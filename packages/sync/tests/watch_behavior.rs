// ABOUTME: Integration tests for push echo suppression and debounced watching
// ABOUTME: Uses a mock provider whose archive upload lands in the watched directory

use burrow_runtime::{
    ContainerConfig, ContainerInfo, ExecResult, ExecStream, Provider, ProviderError,
};
use burrow_sync::{FileNode, FileSyncEngine, FileTree, WatchEvent};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

/// Stands in for the container runtime: uploading an archive extracts it
/// into the storage directory, exactly what a bind mount makes visible on
/// the host side.
struct BindMountProvider {
    root: PathBuf,
}

#[async_trait::async_trait]
impl Provider for BindMountProvider {
    async fn is_available(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn create_container(&self, _config: &ContainerConfig) -> Result<String, ProviderError> {
        Ok("mock".to_string())
    }

    async fn start_container(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop_container(&self, _id: &str, _timeout_secs: u64) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn pause_container(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn unpause_container(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn container_info(&self, id: &str) -> Result<ContainerInfo, ProviderError> {
        Err(ProviderError::NotFound(id.to_string()))
    }

    async fn list_managed(&self, _include_stopped: bool) -> Result<Vec<ContainerInfo>, ProviderError> {
        Ok(vec![])
    }

    async fn exec(
        &self,
        _id: &str,
        _command: Vec<String>,
        _working_dir: Option<String>,
        _env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult, ProviderError> {
        Ok(ExecResult {
            exit_code: 0,
            stdout: vec![],
            stderr: vec![],
        })
    }

    async fn exec_streamed(
        &self,
        _id: &str,
        _command: Vec<String>,
        _working_dir: Option<String>,
        _env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecStream, ProviderError> {
        let (_tx, chunks) = tokio::sync::mpsc::unbounded_channel();
        let (exit_tx, exit_code) = tokio::sync::oneshot::channel();
        let _ = exit_tx.send(0);
        Ok(ExecStream { chunks, exit_code })
    }

    async fn put_archive(
        &self,
        _id: &str,
        _dest_path: &str,
        tar_data: Vec<u8>,
    ) -> Result<(), ProviderError> {
        let mut archive = tar::Archive::new(tar_data.as_slice());
        archive
            .unpack(&self.root)
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn pull_image(&self, _image: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn image_exists(&self, _image: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

fn tree_with(path: &str, contents: &str) -> FileTree {
    FileTree::new(BTreeMap::from([(
        path.to_string(),
        FileNode::file(contents),
    )]))
}

/// Watcher delivery is asynchronous; give events comfortably longer than the
/// 300ms debounce window to land before asserting.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(900)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn push_does_not_echo_through_the_watcher() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileSyncEngine::new(dir.path().to_path_buf(), "/workspace");
    let provider = BindMountProvider {
        root: dir.path().to_path_buf(),
    };

    engine.start_watch().unwrap();
    let mut rx = engine.subscribe();

    engine
        .push(&provider, "mock", &tree_with("a.txt", "x"))
        .await
        .unwrap();

    settle().await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread")]
async fn rapid_writes_coalesce_into_one_event() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileSyncEngine::new(dir.path().to_path_buf(), "/workspace");

    engine.start_watch().unwrap();
    let mut rx = engine.subscribe();

    let target = dir.path().join("app.js");
    for i in 0..3 {
        tokio::fs::write(&target, format!("rev {}", i)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    settle().await;

    let event = rx.try_recv().expect("expected one change event");
    assert_eq!(
        event,
        WatchEvent::Changed {
            path: "app.js".to_string(),
            contents: "rev 2".to_string(),
        }
    );
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread")]
async fn deletions_are_reported_as_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("gone.txt");
    tokio::fs::write(&target, "here for now").await.unwrap();

    let engine = FileSyncEngine::new(dir.path().to_path_buf(), "/workspace");
    engine.start_watch().unwrap();
    let mut rx = engine.subscribe();

    tokio::fs::remove_file(&target).await.unwrap();
    settle().await;

    let event = rx.try_recv().expect("expected a deletion event");
    assert_eq!(
        event,
        WatchEvent::Deleted {
            path: "gone.txt".to_string(),
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn ignored_subtrees_stay_silent() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(dir.path().join("node_modules/pkg"))
        .await
        .unwrap();

    let engine = FileSyncEngine::new(dir.path().to_path_buf(), "/workspace");
    engine.start_watch().unwrap();
    let mut rx = engine.subscribe();

    tokio::fs::write(dir.path().join("node_modules/pkg/index.js"), "ignored")
        .await
        .unwrap();
    settle().await;

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread")]
async fn start_watch_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileSyncEngine::new(dir.path().to_path_buf(), "/workspace");

    engine.start_watch().unwrap();
    engine.start_watch().unwrap();
    assert!(engine.is_watching());

    engine.stop_watch();
    assert!(!engine.is_watching());
    // A second stop is a no-op
    engine.stop_watch();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_watch_cancels_pending_reports() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileSyncEngine::new(dir.path().to_path_buf(), "/workspace");

    engine.start_watch().unwrap();
    let mut rx = engine.subscribe();

    tokio::fs::write(dir.path().join("late.txt"), "never delivered")
        .await
        .unwrap();
    // Stop before the debounce window elapses
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop_watch();

    settle().await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
