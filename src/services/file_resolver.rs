//! 文件解析缓存
//!
//! 远端路径 → 本地文件句柄的进程级缓存。
//! 同一路径的并发请求共享同一个进行中的下载（去重），
//! 成功后结果常驻，直到显式失效。没有自动过期。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::clients::StorageClient;
use crate::error::{AppError, AppResult};
use crate::models::FileHandle;

/// 进行中的下载，可被多个等待者克隆共享。
/// 错误以字符串形式共享（`AppError` 不可克隆）。
type SharedDownload = Shared<BoxFuture<'static, Result<FileHandle, String>>>;

enum Entry {
    Ready(FileHandle),
    Pending(SharedDownload),
}

/// 文件解析缓存
pub struct FileResolver {
    storage: Arc<dyn StorageClient>,
    state: Mutex<HashMap<String, Entry>>,
}

impl FileResolver {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self {
            storage,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// 解析远端路径为本地文件句柄
    ///
    /// 命中缓存立即返回；已有同路径下载在进行中时，
    /// 等待同一个下载而不是再发一次请求。
    pub async fn resolve(&self, remote_path: &str, display_name: &str) -> AppResult<FileHandle> {
        let download = {
            let mut state = self.state.lock().unwrap();
            match state.get(remote_path) {
                Some(Entry::Ready(handle)) => return Ok(handle.clone()),
                Some(Entry::Pending(download)) => download.clone(),
                None => {
                    let storage = self.storage.clone();
                    let path = remote_path.to_string();
                    let name = display_name.to_string();
                    let download: SharedDownload = async move {
                        storage
                            .download_file(&path, &name)
                            .await
                            .map(Arc::new)
                            .map_err(|e| e.to_string())
                    }
                    .boxed()
                    .shared();
                    state.insert(remote_path.to_string(), Entry::Pending(download.clone()));
                    debug!("开始下载: {}", remote_path);
                    download
                }
            }
        };

        let result = download.await;

        // 无论成败都清掉进行中标记；成功则落入缓存。
        // 多个等待者会重复执行这段收尾，操作是幂等的。
        let mut state = self.state.lock().unwrap();
        match result {
            Ok(handle) => {
                state.insert(remote_path.to_string(), Entry::Ready(handle.clone()));
                Ok(handle)
            }
            Err(message) => {
                if matches!(state.get(remote_path), Some(Entry::Pending(_))) {
                    state.remove(remote_path);
                }
                Err(AppError::download_failed(remote_path, message))
            }
        }
    }

    /// 直接写入缓存（本地刚上传过的文件不必再绕一圈下载）
    pub fn prime(&self, remote_path: impl Into<String>, handle: FileHandle) {
        self.state
            .lock()
            .unwrap()
            .insert(remote_path.into(), Entry::Ready(handle));
    }

    /// 显式失效单个条目
    pub fn evict(&self, remote_path: &str) {
        self.state.lock().unwrap().remove(remote_path);
    }

    /// 清空整个缓存
    pub fn clear(&self) {
        self.state.lock().unwrap().clear();
    }
}
