use crate::document::SummaryDocument;
use crate::error::StoreError;
use crate::paths::ImageEntry;
use crate::store::{
    ClusterImages, ClusterInfo, ClusterStore, DeleteOutcome, MergeOutcome, MoveOutcome, MultiCopyOutcome,
    RenameOutcome,
};
use phosor_core::ClusterSummary;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Messages sent from callers to the store thread.
enum StoreRequest {
    Summary(Reply<SummaryDocument>),
    ListClusters(Reply<Vec<ClusterInfo>>),
    GetCluster {
        cluster_id: i32,
        reply: Reply<ClusterInfo>,
    },
    ListClusterImages {
        cluster_id: i32,
        reply: Reply<ClusterImages>,
    },
    ListUnclustered(Reply<Vec<ImageEntry>>),
    RepresentativePath {
        label: String,
        reply: Reply<PathBuf>,
    },
    Rename {
        cluster_id: i32,
        new_label: String,
        reply: Reply<RenameOutcome>,
    },
    Merge {
        source_ids: Vec<i32>,
        target_id: i32,
        reply: Reply<MergeOutcome>,
    },
    Create {
        label: String,
        reply: Reply<ClusterSummary>,
    },
    Delete {
        cluster_id: i32,
        reply: Reply<DeleteOutcome>,
    },
    MoveImage {
        filename: String,
        target_cluster_id: i32,
        reply: Reply<MoveOutcome>,
    },
    MoveImageToMany {
        filename: String,
        target_cluster_ids: Vec<i32>,
        new_cluster_label: Option<String>,
        reply: Reply<MultiCopyOutcome>,
    },
    DeleteImage {
        cluster_id: i32,
        filename: String,
        reply: Reply<()>,
    },
}

impl StoreRequest {
    fn handle(self, store: &ClusterStore) {
        // A dropped receiver means the caller gave up; nothing to report.
        match self {
            StoreRequest::Summary(reply) => {
                let _ = reply.send(store.document());
            }
            StoreRequest::ListClusters(reply) => {
                let _ = reply.send(store.list_clusters());
            }
            StoreRequest::GetCluster { cluster_id, reply } => {
                let _ = reply.send(store.get_cluster(cluster_id));
            }
            StoreRequest::ListClusterImages { cluster_id, reply } => {
                let _ = reply.send(store.list_cluster_images(cluster_id));
            }
            StoreRequest::ListUnclustered(reply) => {
                let _ = reply.send(store.list_unclustered());
            }
            StoreRequest::RepresentativePath { label, reply } => {
                let _ = reply.send(store.representative_path(&label));
            }
            StoreRequest::Rename {
                cluster_id,
                new_label,
                reply,
            } => {
                let _ = reply.send(store.rename(cluster_id, &new_label));
            }
            StoreRequest::Merge {
                source_ids,
                target_id,
                reply,
            } => {
                let _ = reply.send(store.merge(&source_ids, target_id));
            }
            StoreRequest::Create { label, reply } => {
                let _ = reply.send(store.create(&label));
            }
            StoreRequest::Delete { cluster_id, reply } => {
                let _ = reply.send(store.delete(cluster_id));
            }
            StoreRequest::MoveImage {
                filename,
                target_cluster_id,
                reply,
            } => {
                let _ = reply.send(store.move_image(&filename, target_cluster_id));
            }
            StoreRequest::MoveImageToMany {
                filename,
                target_cluster_ids,
                new_cluster_label,
                reply,
            } => {
                let result =
                    store.move_image_to_many(&filename, &target_cluster_ids, new_cluster_label.as_deref());
                let _ = reply.send(result);
            }
            StoreRequest::DeleteImage {
                cluster_id,
                filename,
                reply,
            } => {
                let _ = reply.send(store.delete_image(cluster_id, &filename));
            }
        }
    }
}

/// Clone-safe handle to the store thread.
///
/// All operations on one output root run one at a time on that thread, so
/// each read-modify-write of the summary document completes before the next
/// begins.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreRequest>,
}

impl StoreHandle {
    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> StoreRequest) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelClosed)?;
        reply_rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    pub async fn summary(&self) -> Result<SummaryDocument, StoreError> {
        self.call(StoreRequest::Summary).await
    }

    pub async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, StoreError> {
        self.call(StoreRequest::ListClusters).await
    }

    pub async fn get_cluster(&self, cluster_id: i32) -> Result<ClusterInfo, StoreError> {
        self.call(|reply| StoreRequest::GetCluster { cluster_id, reply })
            .await
    }

    pub async fn list_cluster_images(&self, cluster_id: i32) -> Result<ClusterImages, StoreError> {
        self.call(|reply| StoreRequest::ListClusterImages { cluster_id, reply })
            .await
    }

    pub async fn list_unclustered(&self) -> Result<Vec<ImageEntry>, StoreError> {
        self.call(StoreRequest::ListUnclustered).await
    }

    pub async fn representative_path(&self, label: &str) -> Result<PathBuf, StoreError> {
        let label = label.to_string();
        self.call(|reply| StoreRequest::RepresentativePath { label, reply })
            .await
    }

    pub async fn rename(&self, cluster_id: i32, new_label: &str) -> Result<RenameOutcome, StoreError> {
        let new_label = new_label.to_string();
        self.call(|reply| StoreRequest::Rename {
            cluster_id,
            new_label,
            reply,
        })
        .await
    }

    pub async fn merge(&self, source_ids: Vec<i32>, target_id: i32) -> Result<MergeOutcome, StoreError> {
        self.call(|reply| StoreRequest::Merge {
            source_ids,
            target_id,
            reply,
        })
        .await
    }

    pub async fn create(&self, label: &str) -> Result<ClusterSummary, StoreError> {
        let label = label.to_string();
        self.call(|reply| StoreRequest::Create { label, reply }).await
    }

    pub async fn delete(&self, cluster_id: i32) -> Result<DeleteOutcome, StoreError> {
        self.call(|reply| StoreRequest::Delete { cluster_id, reply })
            .await
    }

    pub async fn move_image(&self, filename: &str, target_cluster_id: i32) -> Result<MoveOutcome, StoreError> {
        let filename = filename.to_string();
        self.call(|reply| StoreRequest::MoveImage {
            filename,
            target_cluster_id,
            reply,
        })
        .await
    }

    pub async fn move_image_to_many(
        &self,
        filename: &str,
        target_cluster_ids: Vec<i32>,
        new_cluster_label: Option<String>,
    ) -> Result<MultiCopyOutcome, StoreError> {
        let filename = filename.to_string();
        self.call(|reply| StoreRequest::MoveImageToMany {
            filename,
            target_cluster_ids,
            new_cluster_label,
            reply,
        })
        .await
    }

    pub async fn delete_image(&self, cluster_id: i32, filename: &str) -> Result<(), StoreError> {
        let filename = filename.to_string();
        self.call(|reply| StoreRequest::DeleteImage {
            cluster_id,
            filename,
            reply,
        })
        .await
    }
}

/// Spawn the store on a dedicated OS thread.
///
/// Fails fast if the output root does not exist. The thread exits once
/// every handle has been dropped.
pub fn spawn_store(root: impl Into<PathBuf>) -> Result<StoreHandle, StoreError> {
    let store = ClusterStore::open(root)?;
    tracing::info!(root = %store.root().display(), "cluster store opened");

    let (tx, mut rx) = mpsc::channel::<StoreRequest>(16);

    std::thread::Builder::new()
        .name("phosor-store".into())
        .spawn(move || {
            tracing::debug!("store thread started");
            while let Some(req) = rx.blocking_recv() {
                req.handle(&store);
            }
            tracing::debug!("store thread exiting");
        })
        .map_err(|source| StoreError::Io {
            context: "spawn store thread".into(),
            source,
        })?;

    Ok(StoreHandle { tx })
}
