//! 远端目录保障：逐级检查并按根到叶的顺序补建缺失目录。

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::disk::{DiskApi, DiskError, FolderCreated};
use crate::path::LogicalPath;

#[derive(Debug, Error)]
pub enum EnsureError {
    #[error("failed to check folder `{segment}`: {source}")]
    FolderCheck {
        segment: String,
        #[source]
        source: DiskError,
    },
    #[error("failed to create folder `{segment}`: {source}")]
    FolderCreation {
        segment: String,
        #[source]
        source: DiskError,
    },
}

impl EnsureError {
    pub fn disk_error(&self) -> &DiskError {
        match self {
            EnsureError::FolderCheck { source, .. } | EnsureError::FolderCreation { source, .. } => {
                source
            }
        }
    }
}

/// 建目录后的可见性轮询参数。
#[derive(Debug, Clone, Copy)]
pub struct VisibilityPoll {
    pub attempts: u32,
    pub backoff: Duration,
}

impl VisibilityPoll {
    #[cfg(test)]
    pub const DISABLED: VisibilityPoll = VisibilityPoll {
        attempts: 0,
        backoff: Duration::ZERO,
    };
}

/// 每级一次存在性检查，仅对 404 的层级建目录。
///
/// 返回新建的层级数量。并发调用方已建好的目录视为已存在。
pub async fn ensure_folder(
    disk: &dyn DiskApi,
    token: &str,
    path: &LogicalPath,
    poll: VisibilityPoll,
) -> Result<usize, EnsureError> {
    let mut created = 0;
    for (segment, encoded) in path.encoded_prefixes() {
        let exists = disk
            .folder_exists(token, &encoded)
            .await
            .map_err(|source| EnsureError::FolderCheck {
                segment: segment.to_string(),
                source,
            })?;
        if exists {
            continue;
        }

        let outcome = disk
            .create_folder(token, &encoded)
            .await
            .map_err(|source| EnsureError::FolderCreation {
                segment: segment.to_string(),
                source,
            })?;
        match outcome {
            FolderCreated::Created => {
                info!(segment, "created remote folder");
                created += 1;
            }
            FolderCreated::AlreadyExists => debug!(segment, "folder created concurrently"),
        }
    }

    if created > 0 {
        wait_until_visible(disk, token, &path.encoded(), poll).await;
    }
    Ok(created)
}

/// 有界指数退避轮询，直到叶目录可见或次数耗尽。
async fn wait_until_visible(disk: &dyn DiskApi, token: &str, encoded: &str, poll: VisibilityPoll) {
    let mut delay = poll.backoff;
    for attempt in 1..=poll.attempts {
        tokio::time::sleep(delay).await;
        match disk.folder_exists(token, encoded).await {
            Ok(true) => {
                debug!(attempt, "folder visible");
                return;
            }
            Ok(false) => debug!(attempt, "folder not visible yet"),
            Err(err) => warn!(attempt, error = %err, "visibility check failed"),
        }
        delay = delay.saturating_mul(2);
    }
    if poll.attempts > 0 {
        warn!(
            attempts = poll.attempts,
            "folder still not visible, continuing"
        );
    }
}
