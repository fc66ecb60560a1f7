use futures::future::BoxFuture;
use tracing::info;
use uuid::Uuid;

/// External side effects to run once a room has been deleted (uploaded media,
/// analytics, ...).
pub trait CleanupHook: Send + Sync {
    fn room_deleted(&self, room_id: Uuid) -> BoxFuture<'static, ()>;
}

/// Default hook that only records the deletion.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCleanup;

impl CleanupHook for LogCleanup {
    fn room_deleted(&self, room_id: Uuid) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            info!(room_id = %room_id, "room resources released");
        })
    }
}
