//! Shared calendar engines, one per notes root.
//!
//! A [`CalendarEngine`] wires a change feed to a recurring event manager. The
//! [`EngineRegistry`] hands out reference-counted handles so several consumers
//! pointed at the same root share one engine; the engine stops when the last
//! handle is dropped.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::NotecalConfig;
use crate::error::{CalError, CalResult};
use crate::feed::ChangeFeed;
use crate::lock::KeyedMutex;
use crate::manager::RecurringEventManager;
use crate::store::NoteStore;

pub struct CalendarEngine<S: NoteStore> {
    feed: ChangeFeed<S>,
    manager: Arc<RecurringEventManager<S>>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl<S: NoteStore> CalendarEngine<S> {
    /// Build an engine and load the initial index.
    ///
    /// Returns once every note under the root has been scanned and applied.
    /// With `watch`, the engine then follows file changes and keeps each
    /// definition's horizon materialized.
    pub async fn start(store: Arc<S>, config: NotecalConfig, watch: bool) -> CalResult<Self> {
        let manager = Arc::new(RecurringEventManager::new(Arc::clone(&store), config.clone()));
        Self::start_with(store, config, manager, watch).await
    }

    /// Like [`CalendarEngine::start`], with a preconfigured manager.
    pub async fn start_with(
        store: Arc<S>,
        config: NotecalConfig,
        manager: Arc<RecurringEventManager<S>>,
        watch: bool,
    ) -> CalResult<Self> {
        let (feed, mut stream) = ChangeFeed::new(store, config);

        if watch {
            feed.start_watching()?;
        }
        feed.rescan().await?;
        let ids = manager.drain(&mut stream.events).await;
        manager.flush_notifications();
        tracing::debug!(definitions = manager.definition_ids().len(), touched = ids.len(), "initial index loaded");

        let engine = CalendarEngine {
            feed,
            manager: Arc::clone(&manager),
            runner: Mutex::new(None),
        };

        if watch {
            let runner = tokio::spawn(Arc::clone(&manager).run(stream));
            *engine.runner.lock() = Some(runner);
            tokio::spawn(async move {
                manager.ensure_all().await;
            });
        }

        Ok(engine)
    }

    pub fn manager(&self) -> &Arc<RecurringEventManager<S>> {
        &self.manager
    }

    pub fn feed(&self) -> &ChangeFeed<S> {
        &self.feed
    }

    /// Apply a new configuration, rescanning when the root or field names changed.
    pub async fn reconfigure(&self, config: NotecalConfig) -> CalResult<()> {
        self.manager.set_config(config.clone());
        self.feed.reconfigure(config).await
    }

    /// Stop watching and processing events. Instance writes already running
    /// are left to finish.
    pub fn stop(&self) {
        self.feed.stop();
        if let Some(runner) = self.runner.lock().take() {
            runner.abort();
        }
        tracing::debug!("engine stopped");
    }
}

struct Entry<S: NoteStore> {
    engine: Arc<CalendarEngine<S>>,
    handles: usize,
}

struct RegistryInner<S: NoteStore> {
    store: Arc<S>,
    engines: Mutex<HashMap<PathBuf, Entry<S>>>,
    starting: KeyedMutex<PathBuf>,
}

impl<S: NoteStore> RegistryInner<S> {
    fn release(&self, root: &Path) {
        let stopped = {
            let mut engines = self.engines.lock();
            let Some(entry) = engines.get_mut(root) else {
                return;
            };
            entry.handles -= 1;
            if entry.handles > 0 {
                return;
            }
            engines.remove(root)
        };

        if let Some(entry) = stopped {
            entry.engine.stop();
            tracing::info!(root = %root.display(), "released calendar engine");
        }
    }
}

/// Engines keyed by canonical notes root.
pub struct EngineRegistry<S: NoteStore> {
    inner: Arc<RegistryInner<S>>,
}

impl<S: NoteStore> Clone for EngineRegistry<S> {
    fn clone(&self) -> Self {
        EngineRegistry {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: NoteStore> EngineRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        EngineRegistry {
            inner: Arc::new(RegistryInner {
                store,
                engines: Mutex::new(HashMap::new()),
                starting: KeyedMutex::new(),
            }),
        }
    }

    /// Get a handle to the engine for `config`'s root, starting one if needed.
    ///
    /// The first acquirer's `watch` choice and configuration win; later
    /// callers share the running engine.
    pub async fn acquire(&self, config: NotecalConfig, watch: bool) -> CalResult<EngineHandle<S>> {
        let root = tokio::fs::canonicalize(config.root())
            .await
            .map_err(|e| CalError::Registry(format!("{}: {}", config.root().display(), e)))?;

        // Serialize starts per root so two callers never build two engines
        let _starting = self.inner.starting.lock(root.clone()).await;

        if let Some(entry) = self.inner.engines.lock().get_mut(&root) {
            entry.handles += 1;
            return Ok(self.handle(root, Arc::clone(&entry.engine)));
        }

        let config = NotecalConfig {
            directory: root.clone(),
            ..config
        };
        let engine = Arc::new(CalendarEngine::start(Arc::clone(&self.inner.store), config, watch).await?);
        tracing::info!(root = %root.display(), watch, "started calendar engine");

        self.inner.engines.lock().insert(
            root.clone(),
            Entry {
                engine: Arc::clone(&engine),
                handles: 1,
            },
        );
        Ok(self.handle(root, engine))
    }

    fn handle(&self, root: PathBuf, engine: Arc<CalendarEngine<S>>) -> EngineHandle<S> {
        EngineHandle {
            root,
            engine,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of running engines.
    pub fn len(&self) -> usize {
        self.inner.engines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A counted reference to a shared engine. Dropping it releases the reference.
pub struct EngineHandle<S: NoteStore> {
    root: PathBuf,
    engine: Arc<CalendarEngine<S>>,
    registry: Arc<RegistryInner<S>>,
}

impl<S: NoteStore> EngineHandle<S> {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shares_engine_with(&self, other: &EngineHandle<S>) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }
}

impl<S: NoteStore> Deref for EngineHandle<S> {
    type Target = CalendarEngine<S>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl<S: NoteStore> Drop for EngineHandle<S> {
    fn drop(&mut self) {
        self.registry.release(&self.root);
    }
}
