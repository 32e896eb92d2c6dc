use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, SpawnError};

/// Spawns onto the current tokio `LocalSet`.
///
/// Must only be used from inside `LocalSet::run_until` (or a task spawned on one); tokio panics otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioLocalSpawner;

impl LocalSpawn for TokioLocalSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        tokio::task::spawn_local(future);
        Ok(())
    }
}
