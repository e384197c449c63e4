//! Serial dispatcher owning the tree.
//!
//! Every tree mutation, local or protocol-driven, runs as a job on one tokio
//! task that owns the [`Context`]. Jobs run in submission order and never
//! overlap, so the model needs no locking. After each job the model is
//! flushed, which delivers queued notifications to subscribers (including
//! the update-propagation listeners of every session).

use std::sync::Arc;

use canopy_model::{BasicEngine, Model, ScriptEngine};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Result, SyncError};

/// State owned by the dispatcher task.
pub struct Context {
    /// The tree.
    pub model: Model,
    /// Engine used for remote execution requests.
    pub engine: Arc<dyn ScriptEngine>,
}

type Job = Box<dyn FnOnce(&mut Context) + Send>;

/// Handle for submitting jobs. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Start a dispatcher with the bundled script engine.
    ///
    /// Must be called within a tokio runtime. The task stops when every
    /// handle has been dropped.
    pub fn spawn(model: Model) -> Self {
        Self::with_engine(model, Arc::new(BasicEngine::new()))
    }

    /// Start a dispatcher with a custom script engine.
    pub fn with_engine(model: Model, engine: Arc<dyn ScriptEngine>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let mut context = Context { model, engine };

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(&mut context);
                context.model.flush();
            }
            debug!("dispatcher stopped");
        });

        Self { tx }
    }

    /// Queue a job without waiting for it.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut Context) + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .map_err(|_| SyncError::Cancelled)
    }

    /// Run a job and wait for its result.
    pub async fn call<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |ctx| {
            let _ = tx.send(job(ctx));
        })?;
        rx.await.map_err(|_| SyncError::Cancelled)
    }

    /// Convenience for jobs that only touch the model.
    pub async fn with_model<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut Model) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |ctx| job(&mut ctx.model)).await
    }

    /// Whether the dispatcher task is still running.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_model::{ModelEvent, ModelListener, SubscriberId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let dispatcher = Dispatcher::spawn(Model::new());
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..100 {
            let log = log.clone();
            dispatcher
                .submit(move |_| log.lock().unwrap().push(i))
                .unwrap();
        }
        dispatcher.call(|_| ()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_call_returns_value() {
        let dispatcher = Dispatcher::spawn(Model::new());
        let key = dispatcher
            .with_model(|m| {
                let node = m.create_node("config");
                m.add_child(m.root(), node, None).unwrap();
                node
            })
            .await
            .unwrap();
        let name = dispatcher
            .with_model(move |m| m.type_name(key).map(str::to_owned))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("config"));
    }

    #[tokio::test]
    async fn test_flush_after_each_job() {
        struct Counter(AtomicUsize);
        impl ModelListener for Counter {
            fn notify(&self, _: &mut Model, _: SubscriberId, _: &ModelEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let dispatcher = Dispatcher::spawn(Model::new());
        let listener = counter.clone();
        dispatcher
            .with_model(move |m| {
                let sub = m.add_listener(listener);
                let root = m.root();
                m.subscribe(root, sub);
                m.set_attribute(root, "a", "1").unwrap();
            })
            .await
            .unwrap();
        // The previous job's flush has run before this one starts.
        dispatcher.call(|_| ()).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
