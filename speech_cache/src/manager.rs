//! Synthesis coordinator.
//!
//! [`CacheManager`] answers "give me audio for this request" from memory,
//! disk or a fresh synthesis, and guarantees at most one synthesis or disk
//! promotion per cache key at a time. Every operation that produces audio
//! runs as its own tokio task and is shared through a
//! [`futures::future::Shared`] handle, so a caller that gives up waiting
//! never cancels it for the others.
//!
//! All bookkeeping lives in one `std::sync::Mutex` that is never held across
//! an `.await`. File I/O happens on the blocking pool. `clear_cache` bumps an
//! epoch; flights started before the bump still answer their callers but no
//! longer install anything into the caches.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::disk::{self, DiskIndex};
use crate::engine::{Engine, EngineRegistry};
use crate::error::{Error, Result};
use crate::filename;
use crate::key::{CacheKey, Options};
use crate::memory::{CachedAudio, ExpireFn, MemoryCache, PendingAudio, SharedFlight};
use crate::options::process_options;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::tags::{self, AudioTagger, AudioTags, Id3Tagger};
use crate::{ATTR_AUDIO_OUTPUT, URL_PREFIX};

/// One text-to-speech request.
#[derive(Debug, Clone, Default)]
pub struct SpeechRequest {
    /// Engine id; the registry default when absent.
    pub engine: Option<String>,
    pub message: String,
    pub language: Option<String>,
    pub options: Option<Options>,
    /// Overrides [`CacheConfig::use_cache`] for this request.
    pub cache: Option<bool>,
}

impl SpeechRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options
            .get_or_insert_with(Options::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// A validated request, ready for lookup.
struct Prepared {
    engine_id: String,
    engine: Arc<dyn Engine>,
    key: CacheKey,
    message: String,
    language: String,
    options: Option<Options>,
    use_cache: bool,
}

impl Prepared {
    /// Extension declared up front through the `audio_output` option.
    fn declared_extension(&self) -> Option<String> {
        match self.options.as_ref()?.get(ATTR_AUDIO_OUTPUT)? {
            Value::String(ext) if !ext.is_empty() => Some(ext.to_lowercase()),
            _ => None,
        }
    }
}

enum Lookup {
    Ready(CachedAudio),
    /// Audio is being produced; `filename` is known up front for placeholders
    /// and promotions.
    Waiting {
        filename: Option<String>,
        task: SharedFlight,
    },
}

struct Flight {
    id: u64,
    filename: Option<String>,
    task: SharedFlight,
}

struct CacheState {
    memory: MemoryCache,
    disk: DiskIndex,
    inflight: HashMap<CacheKey, Flight>,
    epoch: u64,
    next_flight: u64,
}

impl CacheState {
    /// Drop the bookkeeping of a finished flight if it is still the current one.
    fn finish_flight(&mut self, key: &CacheKey, flight: u64) {
        if self.inflight.get(key).is_some_and(|f| f.id == flight) {
            self.inflight.remove(key);
        }
        self.memory.remove_pending(key, flight);
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cleans up after a flight however its task ends, including abort or panic.
struct FlightGuard {
    state: Arc<Mutex<CacheState>>,
    key: CacheKey,
    flight: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.state).finish_flight(&self.key, self.flight);
    }
}

struct Inner {
    config: CacheConfig,
    engines: EngineRegistry,
    tagger: Arc<dyn AudioTagger>,
    cache_dir: PathBuf,
    state: Arc<Mutex<CacheState>>,
    // Writers and promotions take it shared, clear_cache exclusive
    io_lock: RwLock<()>,
    stats: CacheStats,
}

/// Handle to the speech cache; cheap to clone.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    /// Create the cache directory, index its files and start serving.
    pub async fn init(config: CacheConfig, engines: EngineRegistry) -> Result<Self> {
        Self::init_with_tagger(config, engines, Arc::new(Id3Tagger)).await
    }

    pub async fn init_with_tagger(
        config: CacheConfig,
        engines: EngineRegistry,
        tagger: Arc<dyn AudioTagger>,
    ) -> Result<Self> {
        let (cache_dir, disk) = DiskIndex::init(&config.cache_dir, &config.base_dir).await?;
        let time_memory = config.time_memory;

        let state = Arc::new_cyclic(|weak: &Weak<Mutex<CacheState>>| {
            Mutex::new(CacheState {
                memory: MemoryCache::new(time_memory, expire_fn(weak.clone())),
                disk,
                inflight: HashMap::new(),
                epoch: 0,
                next_flight: 0,
            })
        });

        info!(
            engines = engines.len(),
            use_cache = config.use_cache,
            time_memory_secs = time_memory.as_secs(),
            "Speech cache ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                engines,
                tagger,
                cache_dir,
                state,
                io_lock: RwLock::new(()),
                stats: CacheStats::new(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.inner.engines
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    /// Proxy path (`/api/tts_proxy/<file>`) for the request's audio.
    ///
    /// Returns as soon as the file name is known: immediately for memory hits,
    /// disk hits and requests that declare `audio_output`; after synthesis
    /// otherwise.
    pub async fn get_url_path(&self, request: SpeechRequest) -> Result<String> {
        let prepared = self.prepare(request)?;
        let filename = match self.lookup(&prepared)? {
            Lookup::Ready(audio) => audio.filename,
            Lookup::Waiting {
                filename: Some(filename),
                ..
            } => filename,
            Lookup::Waiting { filename: None, task } => task.await?.filename,
        };
        Ok(format!("{URL_PREFIX}{filename}"))
    }

    /// Audio for the request as `(extension, bytes)`.
    pub async fn get_tts_audio(&self, request: SpeechRequest) -> Result<(String, Bytes)> {
        let prepared = self.prepare(request)?;
        let audio = match self.lookup(&prepared)? {
            Lookup::Ready(audio) => audio,
            Lookup::Waiting { task, .. } => task.await?,
        };
        Ok((audio.extension(), audio.audio))
    }

    /// Serve a previously produced file by name. Never synthesizes.
    pub async fn read_tts(&self, filename: &str) -> Result<(Option<&'static str>, Bytes)> {
        let parsed = filename::parse(filename)?;
        let found = {
            let mut state = lock(&self.inner.state);
            self.find(&mut state, &parsed.key, true)
        };
        let audio = match found {
            Some(Lookup::Ready(audio)) => audio,
            Some(Lookup::Waiting { task, .. }) => task.await?,
            None => return Err(Error::NotCached(parsed.key.to_string())),
        };
        Ok((filename::content_type(&audio.extension()), audio.audio))
    }

    /// Drop everything from memory and disk.
    pub async fn clear_cache(&self) {
        let _io = self.inner.io_lock.write().await;
        let filenames = {
            let mut state = lock(&self.inner.state);
            state.memory.clear();
            state.inflight.clear();
            state.epoch += 1;
            state.disk.drain()
        };
        self.inner.stats.record_clear();
        info!(files = filenames.len(), "Clearing TTS cache");
        disk::remove_files(self.inner.cache_dir.clone(), filenames).await;
    }

    /// Whether `engine` accepts the language and options.
    pub fn support_options(
        &self,
        engine: &str,
        language: Option<&str>,
        options: Option<&Options>,
    ) -> Result<bool> {
        let (_, engine) = self.inner.engines.resolve(Some(engine))?;
        Ok(process_options(engine.as_ref(), language, options).is_ok())
    }

    /// Key the request would be cached under.
    pub fn cache_key(&self, request: &SpeechRequest) -> Result<CacheKey> {
        let (engine_id, engine) = self.inner.engines.resolve(request.engine.as_deref())?;
        let (language, options) =
            process_options(engine.as_ref(), request.language.as_deref(), request.options.as_ref())?;
        Ok(CacheKey::derive(&request.message, &language, options.as_ref(), &engine_id))
    }

    /// True if resolved audio for `key` is held in memory.
    pub fn is_in_memory(&self, key: &CacheKey) -> bool {
        lock(&self.inner.state)
            .memory
            .get(key)
            .is_some_and(|entry| entry.pending.is_none())
    }

    pub fn is_on_disk(&self, key: &CacheKey) -> bool {
        lock(&self.inner.state).disk.contains(key)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let state = lock(&self.inner.state);
        self.inner
            .stats
            .snapshot(state.memory.len(), state.disk.len(), state.inflight.len())
    }

    /// Drop memory contents and stop installing results of running flights.
    /// Nothing is written to disk.
    pub fn shutdown(&self) {
        let mut state = lock(&self.inner.state);
        state.memory.clear();
        state.inflight.clear();
        state.epoch += 1;
        info!("Speech cache shut down");
    }

    fn prepare(&self, request: SpeechRequest) -> Result<Prepared> {
        let (engine_id, engine) = self.inner.engines.resolve(request.engine.as_deref())?;
        let (language, options) =
            process_options(engine.as_ref(), request.language.as_deref(), request.options.as_ref())?;
        let key = CacheKey::derive(&request.message, &language, options.as_ref(), &engine_id);
        Ok(Prepared {
            engine_id,
            engine,
            key,
            message: request.message,
            language,
            options,
            use_cache: request.cache.unwrap_or(self.inner.config.use_cache),
        })
    }

    fn lookup(&self, prepared: &Prepared) -> Result<Lookup> {
        let mut state = lock(&self.inner.state);
        if let Some(found) = self.find(&mut state, &prepared.key, prepared.use_cache) {
            return Ok(found);
        }
        self.start_synthesis(&mut state, prepared)
    }

    /// Memory, then in-flight work, then (if allowed) disk.
    fn find(&self, state: &mut CacheState, key: &CacheKey, allow_disk: bool) -> Option<Lookup> {
        if let Some(entry) = state.memory.get(key) {
            return Some(match &entry.pending {
                None => {
                    self.inner.stats.record_memory_hit();
                    Lookup::Ready(CachedAudio {
                        filename: entry.filename.clone(),
                        audio: entry.audio.clone(),
                    })
                }
                Some(pending) => {
                    self.inner.stats.record_shared_wait();
                    Lookup::Waiting {
                        filename: Some(entry.filename.clone()),
                        task: pending.task.clone(),
                    }
                }
            });
        }

        if let Some(flight) = state.inflight.get(key) {
            self.inner.stats.record_shared_wait();
            return Some(Lookup::Waiting {
                filename: flight.filename.clone(),
                task: flight.task.clone(),
            });
        }

        if allow_disk {
            if let Some(filename) = state.disk.get(key).map(str::to_string) {
                let task = self.start_promotion(state, key, filename.clone());
                return Some(Lookup::Waiting {
                    filename: Some(filename),
                    task,
                });
            }
        }
        None
    }

    /// Spawn `work` as the single flight for `key`.
    fn spawn_flight<F>(
        &self,
        state: &mut CacheState,
        key: &CacheKey,
        filename: Option<String>,
        work: impl FnOnce(u64, u64) -> F,
    ) -> (u64, SharedFlight)
    where
        F: Future<Output = Result<CachedAudio>> + Send + 'static,
    {
        state.next_flight += 1;
        let id = state.next_flight;
        let work = work(id, state.epoch);
        let guard = FlightGuard {
            state: Arc::clone(&self.inner.state),
            key: key.clone(),
            flight: id,
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let task = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Error::Task(format!("speech flight: {e}"))))
        }
        .boxed()
        .shared();

        state.inflight.insert(
            key.clone(),
            Flight {
                id,
                filename,
                task: task.clone(),
            },
        );
        (id, task)
    }

    fn start_promotion(&self, state: &mut CacheState, key: &CacheKey, filename: String) -> SharedFlight {
        debug!(%key, file = %filename, "Loading TTS audio from disk");
        let inner = Arc::clone(&self.inner);
        let job_key = key.clone();
        let (_, task) = self.spawn_flight(state, key, Some(filename.clone()), move |flight, epoch| {
            promote(inner, job_key, filename, flight, epoch)
        });
        task
    }

    fn start_synthesis(&self, state: &mut CacheState, prepared: &Prepared) -> Result<Lookup> {
        let declared = prepared.declared_extension();
        let placeholder = match &declared {
            Some(ext) => {
                let filename = prepared.key.filename(ext);
                if !filename::is_valid(&filename) {
                    return Err(Error::Synthesis(format!("Invalid audio output '{ext}'")));
                }
                Some(filename)
            }
            None => None,
        };

        let job = SynthesisJob {
            inner: Arc::clone(&self.inner),
            engine_id: prepared.engine_id.clone(),
            engine: Arc::clone(&prepared.engine),
            key: prepared.key.clone(),
            message: prepared.message.clone(),
            language: prepared.language.clone(),
            options: prepared.options.clone(),
            use_cache: prepared.use_cache,
            declared,
        };
        let (flight, task) = self.spawn_flight(state, &prepared.key, placeholder.clone(), move |flight, epoch| {
            job.run(flight, epoch)
        });

        if let Some(filename) = &placeholder {
            state.memory.put_placeholder(
                prepared.key.clone(),
                filename.clone(),
                PendingAudio {
                    flight,
                    task: task.clone(),
                },
            );
        }
        Ok(Lookup::Waiting {
            filename: placeholder,
            task,
        })
    }
}

fn expire_fn(state: Weak<Mutex<CacheState>>) -> ExpireFn {
    Arc::new(move |key, generation| {
        if let Some(state) = state.upgrade() {
            lock(&state).memory.expire(&key, generation);
        }
    })
}

async fn promote(inner: Arc<Inner>, key: CacheKey, filename: String, flight: u64, epoch: u64) -> Result<CachedAudio> {
    let loaded = {
        let _io = inner.io_lock.read().await;
        disk::load(inner.cache_dir.clone(), key.clone(), filename.clone()).await
    };

    let mut state = lock(&inner.state);
    match loaded {
        Ok(audio) => {
            if state.epoch == epoch {
                state.memory.put_resolved(key.clone(), filename.clone(), audio.clone());
            }
            state.finish_flight(&key, flight);
            inner.stats.record_disk_promotion();
            Ok(CachedAudio { filename, audio })
        }
        Err(e) => {
            warn!(%key, error = %e, "Can't load cached TTS audio");
            if state.disk.get(&key) == Some(filename.as_str()) {
                state.disk.remove(&key);
            }
            state.finish_flight(&key, flight);
            Err(e)
        }
    }
}

struct SynthesisJob {
    inner: Arc<Inner>,
    engine_id: String,
    engine: Arc<dyn Engine>,
    key: CacheKey,
    message: String,
    language: String,
    options: Option<Options>,
    use_cache: bool,
    declared: Option<String>,
}

impl SynthesisJob {
    async fn run(self, flight: u64, epoch: u64) -> Result<CachedAudio> {
        let result = self.synthesize().await;

        let mut state = lock(&self.inner.state);
        let (filename, audio) = match result {
            Ok(produced) => produced,
            Err(e) => {
                state.finish_flight(&self.key, flight);
                drop(state);
                self.inner.stats.record_synthesis_failure();
                warn!(engine_id = %self.engine_id, key = %self.key, error = %e, "TTS synthesis failed");
                return Err(e);
            }
        };

        let installed = state.epoch == epoch;
        if installed {
            state
                .memory
                .put_resolved(self.key.clone(), filename.clone(), audio.clone());
        }
        state.finish_flight(&self.key, flight);
        drop(state);

        if installed && self.use_cache {
            tokio::spawn(persist(
                Arc::clone(&self.inner),
                self.key.clone(),
                filename.clone(),
                audio.clone(),
                epoch,
            ));
        }
        Ok(CachedAudio { filename, audio })
    }

    async fn synthesize(&self) -> Result<(String, Bytes)> {
        self.inner.stats.record_synthesis();
        debug!(engine_id = %self.engine_id, key = %self.key, "Synthesizing speech");

        let produced = self
            .engine
            .synthesize(&self.message, &self.language, self.options.as_ref())
            .await
            .map_err(|e| Error::Synthesis(format!("{e:#}")))?;
        if produced.data.is_empty() {
            return Err(Error::Synthesis(format!(
                "No TTS from {} for '{}'",
                self.engine_id, self.message
            )));
        }

        let extension = produced.extension.to_lowercase();
        if let Some(declared) = &self.declared {
            if *declared != extension {
                return Err(Error::Synthesis(format!(
                    "{} returned {extension} audio, {declared} was requested",
                    self.engine_id
                )));
            }
        }

        let filename = self.key.filename(&extension);
        if !filename::is_valid(&filename) {
            return Err(Error::Synthesis(format!(
                "{} returned audio with unusable extension '{extension}'",
                self.engine_id
            )));
        }

        let tags = AudioTags::for_request(
            self.engine.name(),
            &self.message,
            &self.language,
            self.options.as_ref(),
        );
        let audio = tags::tag_audio(self.inner.tagger.as_ref(), &extension, produced.data, &tags);
        Ok((filename, audio))
    }
}

/// Best-effort write of resolved audio to disk.
async fn persist(inner: Arc<Inner>, key: CacheKey, filename: String, audio: Bytes, epoch: u64) {
    let _io = inner.io_lock.read().await;
    let current = lock(&inner.state).epoch;
    if current != epoch {
        debug!(%key, "Cache cleared, skipping write");
        return;
    }

    match disk::persist(inner.cache_dir.clone(), filename.clone(), audio).await {
        Ok(()) => {
            let mut state = lock(&inner.state);
            if state.epoch == epoch {
                state.disk.insert(key, filename);
            }
        }
        Err(e) => {
            inner.stats.record_persist_failure();
            error!(%key, error = %e, "Can't write TTS audio to cache");
        }
    }
}
