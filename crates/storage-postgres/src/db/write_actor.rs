use std::any::Any;
use std::sync::Arc;

use diesel::pg::PgConnection;
use diesel::Connection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use super::DbPool;
use crate::errors::StorageError;
use finpipe_core::errors::{Error, Result};

// A job runs against the writer's connection inside one transaction.
type Job<T> = Box<dyn FnOnce(&mut PgConnection) -> Result<T> + Send + 'static>;

type AnyBox = Box<dyn Any + Send + 'static>;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<(Job<AnyBox>, oneshot::Sender<Result<AnyBox>>)>,
}

impl WriteHandle {
    /// Executes `job` on the writer, inside a single transaction.
    ///
    /// The transaction commits only if `job` returns `Ok`; any error rolls
    /// back every statement the job issued.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (ret_tx, ret_rx) = oneshot::channel();

        self.tx
            .send((
                Box::new(move |c| job(c).map(|v| Box::new(v) as AnyBox)),
                ret_tx,
            ))
            .await
            .map_err(|_| writer_gone("writer actor stopped"))?;

        let boxed = ret_rx
            .await
            .map_err(|_| writer_gone("writer actor dropped the reply"))??;

        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| Error::Unexpected("writer actor returned an unexpected type".to_string()))
    }
}

fn writer_gone(message: &str) -> Error {
    StorageError::WriterUnavailable(message.to_string()).into()
}

/// Spawns a background task that serializes every durable write.
///
/// A pooled connection is checked out per job, so a database restart costs
/// the jobs that hit it and nothing more.
pub fn spawn_writer(pool: Arc<DbPool>) -> WriteHandle {
    let (tx, mut rx) = mpsc::channel::<(Job<AnyBox>, oneshot::Sender<Result<AnyBox>>)>(64);

    tokio::spawn(async move {
        while let Some((job, reply_tx)) = rx.recv().await {
            let result = run_job(&pool, job);
            if let Err(e) = &result {
                error!("Write job failed: {}", e);
            }
            // The caller may have gone away; nothing to do then
            let _ = reply_tx.send(result);
        }
        debug!("Writer actor stopped");
    });

    WriteHandle { tx }
}

fn run_job(pool: &DbPool, job: Job<AnyBox>) -> Result<AnyBox> {
    let mut conn = pool.get().map_err(StorageError::from)?;
    conn.transaction::<_, StorageError, _>(|c| job(c).map_err(StorageError::from))
        .map_err(Error::from)
}
