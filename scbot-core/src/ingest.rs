//! Mention ingestion: the dispatch procedure, the polling loop with its
//! seen-id set, and the bounded streaming worker pool.

use crate::collab::{MentionSource, Publisher, StreamRules, VideoMuxer};
use crate::config::DedupPolicy;
use crate::error::ProcessError;
use crate::mention::{compose_reply, BotIdentity, MentionId, MentionRecord};
use crate::renderer::Render;
use crate::text::Sanitizer;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// What happened to one mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Posted { reply: String },
    /// The definition could not be turned into a video. Nothing was posted.
    Skipped { reason: String },
}

/// Reconstruct -> filter -> render -> mux -> upload -> reply, for one mention.
pub struct Dispatcher {
    sanitizer: Sanitizer,
    renderer: Arc<dyn Render>,
    muxer: Arc<dyn VideoMuxer>,
    publisher: Arc<dyn Publisher>,
    work_dir: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(
        identity: &BotIdentity,
        renderer: Arc<dyn Render>,
        muxer: Arc<dyn VideoMuxer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            sanitizer: Sanitizer::new(&identity.screen_name),
            renderer,
            muxer,
            publisher,
            work_dir: None,
        }
    }

    /// Directory for the intermediate video file.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Conversion failures are logged and reported as [`DispatchOutcome::Skipped`];
    /// anything else (I/O, spawn, source or publisher errors) is returned.
    pub fn dispatch(&self, record: &MentionRecord) -> anyhow::Result<DispatchOutcome> {
        let definition = self.sanitizer.definition(&record.text, record.urls());
        debug!(id = %record.id, %definition, raw = %record.text, "filtered definition");
        if definition.is_empty() {
            info!(id = %record.id, "mention carries no definition");
            return Ok(DispatchOutcome::Skipped {
                reason: "empty definition".to_string(),
            });
        }

        let audio = match self.renderer.render_code(&definition) {
            Ok(audio) => audio,
            Err(e) if e.is_conversion() => {
                info!(id = %record.id, error = %e, "could not convert definition to audio");
                return Ok(DispatchOutcome::Skipped { reason: e.to_string() });
            }
            Err(e) => return Err(e.into()),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("scbot-").suffix(".mp4");
        let video = match &self.work_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        }
        .into_temp_path();
        match self.muxer.mux(audio.path(), &video) {
            Ok(()) => {}
            Err(e @ ProcessError::Exit { .. }) => {
                info!(id = %record.id, error = %e, "could not mux video");
                return Ok(DispatchOutcome::Skipped { reason: e.to_string() });
            }
            Err(e) => return Err(e.into()),
        }

        let media = self.publisher.upload_media(&video)?;
        let reply = compose_reply(record, &definition);
        self.publisher.reply(&record.id, &reply, &media)?;
        info!(id = %record.id, %reply, "posted reply");
        Ok(DispatchOutcome::Posted { reply })
    }
}

/// Cooperative stop signal shared between the ingestion loop and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`. Returns true if the signal fired.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Ids already handled by the polling loop.
#[derive(Debug, Clone)]
pub struct SeenIds {
    ids: HashSet<MentionId>,
    policy: DedupPolicy,
}

impl SeenIds {
    pub fn new(policy: DedupPolicy, initial: &[MentionRecord]) -> Self {
        Self {
            ids: initial.iter().map(|r| r.id.clone()).collect(),
            policy,
        }
    }

    pub fn contains(&self, id: &MentionId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Records not seen yet, in arrival order, each id at most once.
    pub fn unseen<'a>(&self, batch: &'a [MentionRecord]) -> Vec<&'a MentionRecord> {
        let mut taken = HashSet::new();
        batch
            .iter()
            .filter(|r| !self.ids.contains(&r.id) && taken.insert(r.id.clone()))
            .collect()
    }

    pub fn update(&mut self, batch: &[MentionRecord]) {
        if self.policy == DedupPolicy::Replace {
            self.ids.clear();
        }
        self.ids.extend(batch.iter().map(|r| r.id.clone()));
    }
}

/// Counts for one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub posted: usize,
    pub skipped: usize,
}

/// Fetch, diff against the seen set, dispatch what is new, sleep, repeat.
pub struct PollingIngestor<S: MentionSource> {
    source: S,
    dispatcher: Arc<Dispatcher>,
    policy: DedupPolicy,
    interval: Duration,
    seen: Option<SeenIds>,
}

impl<S: MentionSource> PollingIngestor<S> {
    pub fn new(source: S, dispatcher: Arc<Dispatcher>, policy: DedupPolicy, interval: Duration) -> Self {
        Self {
            source,
            dispatcher,
            policy,
            interval,
            seen: None,
        }
    }

    pub fn seen(&self) -> Option<&SeenIds> {
        self.seen.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Record what is already there without dispatching it.
    pub fn baseline(&mut self) -> anyhow::Result<usize> {
        let current = self.source.fetch_mentions()?;
        info!(count = current.len(), "baseline mentions recorded");
        self.seen = Some(SeenIds::new(self.policy, &current));
        Ok(current.len())
    }

    /// One fetch-and-dispatch cycle. Takes the baseline instead if there is none yet.
    pub fn poll_once(&mut self) -> anyhow::Result<CycleReport> {
        if self.seen.is_none() {
            let fetched = self.baseline()?;
            return Ok(CycleReport {
                fetched,
                ..CycleReport::default()
            });
        }

        let current = self.source.fetch_mentions()?;
        let mut report = CycleReport {
            fetched: current.len(),
            ..CycleReport::default()
        };
        if let Some(seen) = self.seen.as_mut() {
            for mention in seen.unseen(&current) {
                info!(id = %mention.id, text = %mention.text, "new mention");
                match self.dispatcher.dispatch(mention)? {
                    DispatchOutcome::Posted { .. } => report.posted += 1,
                    DispatchOutcome::Skipped { .. } => report.skipped += 1,
                }
            }
            seen.update(&current);
        }
        Ok(report)
    }

    /// Run until `shutdown` fires or a non-conversion error occurs, then disconnect.
    pub fn run(&mut self, shutdown: &Shutdown) -> anyhow::Result<()> {
        let result = self.run_cycles(shutdown);
        if let Err(e) = self.source.disconnect() {
            warn!(error = %e, "disconnect failed");
        }
        result
    }

    fn run_cycles(&mut self, shutdown: &Shutdown) -> anyhow::Result<()> {
        if self.seen.is_none() {
            self.baseline()?;
        }
        loop {
            if shutdown.is_triggered() {
                break;
            }
            let report = self.poll_once()?;
            debug!(?report, secs = self.interval.as_secs(), "cycle done, going to sleep");
            if shutdown.wait(self.interval) {
                break;
            }
        }
        info!("polling stopped");
        Ok(())
    }
}

/// Replace all stream rules with the one matching mentions of `identity`.
pub fn install_mention_rule(rules: &mut dyn StreamRules, identity: &BotIdentity) -> anyhow::Result<()> {
    rules.delete_all_rules()?;
    let rule = identity.mention_rule();
    rules.add_rule(&rule)?;
    info!(%rule, "stream rule installed");
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("dispatch queue is full")]
    QueueFull,
    #[error("stream ingestor is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Authored by the bot itself.
    Ignored,
}

/// Counters of the streaming pool.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub queued: AtomicU64,
    pub ignored: AtomicU64,
    pub rejected: AtomicU64,
    pub posted: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

impl StreamStats {
    /// Dispatches that have finished one way or another.
    pub fn finished(&self) -> u64 {
        self.posted.load(Ordering::SeqCst) + self.skipped.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }
}

/// Push-driven ingestion: a fixed pool of dispatch threads behind a bounded queue.
///
/// Dropping the ingestor closes the queue; records already accepted are still
/// dispatched by the detached workers.
pub struct StreamIngestor {
    identity: BotIdentity,
    queue: SyncSender<MentionRecord>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<StreamStats>,
}

impl StreamIngestor {
    pub fn start(
        identity: BotIdentity,
        dispatcher: Arc<Dispatcher>,
        workers: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(StreamStats::default());
        let workers = (0..workers.max(1))
            .map(|n| {
                let rx = Arc::clone(&rx);
                let dispatcher = Arc::clone(&dispatcher);
                let stats = Arc::clone(&stats);
                thread::Builder::new()
                    .name(format!("scbot-dispatch-{n}"))
                    .spawn(move || worker_loop(rx, dispatcher, stats))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        info!(workers = workers.len(), queue_capacity, "dispatch pool started");
        Ok(Self {
            identity,
            queue: tx,
            workers,
            stats,
        })
    }

    /// Delivery callback: never blocks.
    pub fn deliver(&self, record: MentionRecord) -> Result<Delivery, DeliveryError> {
        if self.identity.is_self(&record) {
            debug!(id = %record.id, "ignoring own post");
            self.stats.ignored.fetch_add(1, Ordering::SeqCst);
            return Ok(Delivery::Ignored);
        }
        let id = record.id.clone();
        match self.queue.try_send(record) {
            Ok(()) => {
                debug!(%id, "mention queued");
                self.stats.queued.fetch_add(1, Ordering::SeqCst);
                Ok(Delivery::Queued)
            }
            Err(TrySendError::Full(_)) => {
                warn!(%id, "dispatch queue full, rejecting mention");
                self.stats.rejected.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Closed),
        }
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    /// Stop accepting records and wait for everything accepted to finish.
    pub fn shutdown(self) {
        let Self { queue, workers, .. } = self;
        drop(queue);
        for w in workers {
            if w.join().is_err() {
                error!("dispatch worker panicked");
            }
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<MentionRecord>>>, dispatcher: Arc<Dispatcher>, stats: Arc<StreamStats>) {
    loop {
        let next = rx.lock().unwrap_or_else(|e| e.into_inner()).recv();
        let Ok(record) = next else { break };
        info!(id = %record.id, text = %record.text, "new mention");
        match dispatcher.dispatch(&record) {
            Ok(DispatchOutcome::Posted { .. }) => {
                stats.posted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(DispatchOutcome::Skipped { .. }) => {
                stats.skipped.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                error!(id = %record.id, error = %e, "dispatch failed");
                stats.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
    debug!("dispatch worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mention::Entities;
    use std::time::Instant;

    fn rec(id: &str) -> MentionRecord {
        MentionRecord {
            id: id.into(),
            author_id: "u".into(),
            author_screen_name: None,
            text: String::new(),
            entities: Entities::default(),
        }
    }

    fn ids(records: &[&MentionRecord]) -> Vec<String> {
        records.iter().map(|r| r.id.to_string()).collect()
    }

    #[test]
    fn unseen_keeps_arrival_order() {
        let seen = SeenIds::new(DedupPolicy::Replace, &[rec("2")]);
        let batch = [rec("5"), rec("2"), rec("3"), rec("9")];
        assert_eq!(ids(&seen.unseen(&batch)), ["5", "3", "9"]);
    }

    #[test]
    fn unseen_yields_duplicate_ids_once() {
        let seen = SeenIds::new(DedupPolicy::Replace, &[]);
        let batch = [rec("1"), rec("1"), rec("2")];
        assert_eq!(ids(&seen.unseen(&batch)), ["1", "2"]);
    }

    #[test]
    fn replace_forgets_ids_outside_latest_window() {
        let mut seen = SeenIds::new(DedupPolicy::Replace, &[rec("a"), rec("b")]);
        seen.update(&[rec("c")]);
        assert!(!seen.contains(&"a".into()));
        assert!(seen.contains(&"c".into()));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn union_remembers_everything() {
        let mut seen = SeenIds::new(DedupPolicy::Union, &[rec("a"), rec("b")]);
        seen.update(&[rec("c")]);
        assert!(seen.contains(&"a".into()));
        assert!(seen.contains(&"c".into()));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn shutdown_interrupts_wait() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });
        let started = Instant::now();
        assert!(shutdown.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn wait_times_out_without_signal() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait(Duration::from_millis(20)));
    }
}
