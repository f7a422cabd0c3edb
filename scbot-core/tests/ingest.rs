//! Dispatch, polling and streaming against in-memory collaborators.

use anyhow::anyhow;
use scbot_core::mention::Entities;
use scbot_core::{
    install_mention_rule, BotIdentity, DedupPolicy, Delivery, DeliveryError, DispatchOutcome, Dispatcher, MediaId,
    MentionId, MentionRecord, MentionSource, ProcessError, Publisher, Render, RenderArtifact, RenderError, Shutdown,
    Stage, StreamIngestor, StreamRules, UrlEntity, VideoMuxer,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Writes the definition to a file; anything containing "invalid" fails to convert.
struct FakeRenderer {
    dir: tempfile::TempDir,
    codes: Mutex<Vec<String>>,
}

impl FakeRenderer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dir: tempfile::tempdir().unwrap(),
            codes: Mutex::new(Vec::new()),
        })
    }

    fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

impl Render for FakeRenderer {
    fn render_code(&self, code: &str) -> Result<RenderArtifact, RenderError> {
        let n = {
            let mut codes = self.codes.lock().unwrap();
            codes.push(code.to_string());
            codes.len()
        };
        if code.contains("invalid") {
            return Err(RenderError::Invalid { code: code.to_string() });
        }
        let path = self.dir.path().join(format!("render-{n}.wav"));
        std::fs::write(&path, code)?;
        Ok(RenderArtifact::from_path(path, Stage::Final)?)
    }
}

/// Blocks every render until released, announcing each start.
struct GatedRenderer {
    inner: Arc<FakeRenderer>,
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Render for GatedRenderer {
    fn render_code(&self, code: &str) -> Result<RenderArtifact, RenderError> {
        let _ = self.started.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.render_code(code)
    }
}

struct CopyMuxer;

impl VideoMuxer for CopyMuxer {
    fn mux(&self, audio: &Path, video: &Path) -> Result<(), ProcessError> {
        std::fs::copy(audio, video).map_err(|source| ProcessError::Spawn {
            program: "copy".to_string(),
            source,
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Posted {
    in_reply_to: MentionId,
    text: String,
    media: MediaId,
    video_body: String,
}

#[derive(Default)]
struct RecordingPublisher {
    uploads: Mutex<Vec<String>>,
    replies: Mutex<Vec<Posted>>,
    fail_replies: bool,
}

impl RecordingPublisher {
    fn replies(&self) -> Vec<Posted> {
        self.replies.lock().unwrap().clone()
    }

    fn reply_ids(&self) -> Vec<String> {
        self.replies().into_iter().map(|p| p.in_reply_to.to_string()).collect()
    }
}

impl Publisher for RecordingPublisher {
    fn upload_media(&self, video: &Path) -> anyhow::Result<MediaId> {
        let body = std::fs::read_to_string(video)?;
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(body);
        Ok(MediaId(format!("media-{}", uploads.len())))
    }

    fn reply(&self, in_reply_to: &MentionId, text: &str, media: &MediaId) -> anyhow::Result<()> {
        if self.fail_replies {
            return Err(anyhow!("platform refused the reply"));
        }
        let video_body = self.uploads.lock().unwrap().last().cloned().unwrap_or_default();
        self.replies.lock().unwrap().push(Posted {
            in_reply_to: in_reply_to.clone(),
            text: text.to_string(),
            media: media.clone(),
            video_body,
        });
        Ok(())
    }
}

/// Returns one scripted batch per fetch; errors once the script runs out.
#[derive(Default)]
struct ScriptedSource {
    batches: VecDeque<Vec<MentionRecord>>,
    fetches: usize,
    disconnects: usize,
}

impl ScriptedSource {
    fn new(batches: Vec<Vec<MentionRecord>>) -> Self {
        Self {
            batches: batches.into(),
            ..Self::default()
        }
    }
}

impl MentionSource for ScriptedSource {
    fn fetch_mentions(&mut self) -> anyhow::Result<Vec<MentionRecord>> {
        self.fetches += 1;
        self.batches.pop_front().ok_or_else(|| anyhow!("feed unavailable"))
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.disconnects += 1;
        Ok(())
    }
}

#[derive(Default)]
struct FakeRules {
    rules: Vec<String>,
    deletes: usize,
}

impl StreamRules for FakeRules {
    fn delete_all_rules(&mut self) -> anyhow::Result<()> {
        self.deletes += 1;
        self.rules.clear();
        Ok(())
    }

    fn add_rule(&mut self, rule: &str) -> anyhow::Result<()> {
        self.rules.push(rule.to_string());
        Ok(())
    }
}

fn identity() -> BotIdentity {
    BotIdentity::new("sc2sbot", "42")
}

fn mention(id: &str, text: &str) -> MentionRecord {
    MentionRecord {
        id: id.into(),
        author_id: "7".into(),
        author_screen_name: Some("alice".to_string()),
        text: format!("@sc2sbot {text}"),
        entities: Entities::default(),
    }
}

fn dispatcher(renderer: Arc<dyn Render>, publisher: Arc<RecordingPublisher>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(&identity(), renderer, Arc::new(CopyMuxer), publisher))
}

fn polling(
    batches: Vec<Vec<MentionRecord>>,
    policy: DedupPolicy,
) -> (
    scbot_core::PollingIngestor<ScriptedSource>,
    Arc<FakeRenderer>,
    Arc<RecordingPublisher>,
) {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let ingestor = scbot_core::PollingIngestor::new(
        ScriptedSource::new(batches),
        dispatcher(renderer.clone(), publisher.clone()),
        policy,
        Duration::from_millis(1),
    );
    (ingestor, renderer, publisher)
}

#[test]
fn dispatch_posts_reply_with_reconstructed_definition() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let d = dispatcher(renderer.clone(), publisher.clone());

    let mut record = mention("100", "{https://t.co/a(440)} #supercollider");
    record.entities.urls.push(UrlEntity {
        url: "https://t.co/a".to_string(),
        display_url: "SinOsc.ar".to_string(),
    });
    let outcome = d.dispatch(&record).unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Posted {
            reply: "@alice {SinOsc.ar(440)}".to_string()
        }
    );
    assert_eq!(renderer.codes(), ["{SinOsc.ar(440)}"]);
    let posted = publisher.replies();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].in_reply_to, MentionId::new("100"));
    assert_eq!(posted[0].media, MediaId("media-1".to_string()));
    assert_eq!(posted[0].video_body, "{SinOsc.ar(440)}");
}

#[test]
fn dispatch_truncates_long_definitions_in_reply() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let d = dispatcher(renderer, publisher.clone());
    let long = format!("{{{}}}", "SinOsc.ar*".repeat(20));
    d.dispatch(&mention("1", &long)).unwrap();
    let text = &publisher.replies()[0].text;
    assert!(text.starts_with("@alice {SinOsc.ar*"));
    assert!(text.ends_with("..."));
    assert_eq!(text.chars().count(), "@alice ".len() + 100 + 3);
}

#[test]
fn conversion_failure_is_skipped() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let d = dispatcher(renderer.clone(), publisher.clone());
    let outcome = d.dispatch(&mention("1", "{ invalid")).unwrap();
    assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));
    assert_eq!(renderer.codes().len(), 1);
    assert!(publisher.replies().is_empty());
}

#[test]
fn empty_definition_is_not_rendered() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let d = dispatcher(renderer.clone(), publisher.clone());
    let mut record = mention("1", "#thanks");
    record.text = "@SC2SBOT #thanks".to_string();
    let outcome = d.dispatch(&record).unwrap();
    assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));
    assert!(renderer.codes().is_empty());
}

#[test]
fn publisher_error_propagates() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher {
        fail_replies: true,
        ..RecordingPublisher::default()
    });
    let d = dispatcher(renderer, publisher);
    let err = d.dispatch(&mention("1", "SinOsc.ar")).unwrap_err();
    assert!(err.to_string().contains("refused"));
}

#[test]
fn baseline_records_without_dispatching() {
    let (mut ingestor, renderer, publisher) =
        polling(vec![vec![mention("1", "a"), mention("2", "b")]], DedupPolicy::Replace);
    let report = ingestor.poll_once().unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.posted, 0);
    assert!(renderer.codes().is_empty());
    assert!(publisher.replies().is_empty());
    assert_eq!(ingestor.seen().map(|s| s.len()), Some(2));
}

#[test]
fn new_mentions_are_dispatched_in_arrival_order() {
    let (mut ingestor, renderer, publisher) = polling(
        vec![
            vec![mention("1", "old")],
            vec![mention("3", "c"), mention("1", "old"), mention("2", "b")],
        ],
        DedupPolicy::Replace,
    );
    ingestor.baseline().unwrap();
    let report = ingestor.poll_once().unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.posted, 2);
    assert_eq!(renderer.codes(), ["c", "b"]);
    assert_eq!(publisher.reply_ids(), ["3", "2"]);
}

#[test]
fn record_seen_in_a_cycle_is_never_dispatched_again() {
    // B fails to convert in cycle 1; the overwrite marks it seen anyway.
    let (mut ingestor, renderer, publisher) = polling(
        vec![
            vec![],
            vec![mention("A", "SinOsc.ar"), mention("B", "invalid")],
            vec![mention("A", "SinOsc.ar"), mention("B", "invalid")],
            vec![mention("B", "invalid")],
        ],
        DedupPolicy::Replace,
    );
    ingestor.baseline().unwrap();
    let first = ingestor.poll_once().unwrap();
    assert_eq!((first.posted, first.skipped), (1, 1));
    for _ in 0..2 {
        let later = ingestor.poll_once().unwrap();
        assert_eq!((later.posted, later.skipped), (0, 0));
    }
    assert_eq!(renderer.codes(), ["SinOsc.ar", "invalid"]);
    assert_eq!(publisher.reply_ids(), ["A"]);
}

#[test]
fn replace_policy_reposts_a_record_that_left_the_window() {
    let batches = || {
        vec![
            vec![mention("A", "a")],
            vec![mention("B", "b")],
            vec![mention("A", "a"), mention("B", "b")],
        ]
    };

    let (mut replace, _, replace_pub) = polling(batches(), DedupPolicy::Replace);
    replace.baseline().unwrap();
    replace.poll_once().unwrap();
    replace.poll_once().unwrap();
    assert_eq!(replace_pub.reply_ids(), ["B", "A"]);

    let (mut union, _, union_pub) = polling(batches(), DedupPolicy::Union);
    union.baseline().unwrap();
    union.poll_once().unwrap();
    union.poll_once().unwrap();
    assert_eq!(union_pub.reply_ids(), ["B"]);
}

#[test]
fn run_stops_on_shutdown_and_disconnects() {
    let (mut ingestor, renderer, _) = polling(vec![vec![mention("1", "a")]], DedupPolicy::Replace);
    let shutdown = Shutdown::new();
    shutdown.trigger();
    ingestor.run(&shutdown).unwrap();
    assert_eq!(ingestor.source().fetches, 1);
    assert_eq!(ingestor.source().disconnects, 1);
    assert!(renderer.codes().is_empty());
}

#[test]
fn run_propagates_source_errors_and_still_disconnects() {
    let (mut ingestor, _, publisher) = polling(
        vec![vec![], vec![mention("1", "SinOsc.ar")]],
        DedupPolicy::Replace,
    );
    let err = ingestor.run(&Shutdown::new()).unwrap_err();
    assert!(err.to_string().contains("feed unavailable"));
    assert_eq!(ingestor.source().disconnects, 1);
    assert_eq!(publisher.reply_ids(), ["1"]);
}

#[test]
fn mention_rule_replaces_existing_rules() {
    let mut rules = FakeRules {
        rules: vec!["from:someone".to_string(), "#old".to_string()],
        deletes: 0,
    };
    install_mention_rule(&mut rules, &identity()).unwrap();
    assert_eq!(rules.deletes, 1);
    assert_eq!(rules.rules, ["@sc2sbot"]);
}

#[test]
fn stream_ignores_own_posts() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let stream = StreamIngestor::start(identity(), dispatcher(renderer.clone(), publisher.clone()), 2, 4).unwrap();

    let mut own = mention("1", "SinOsc.ar");
    own.author_id = "42".into();
    assert_eq!(stream.deliver(own), Ok(Delivery::Ignored));
    assert_eq!(stream.deliver(mention("2", "Saw.ar")), Ok(Delivery::Queued));

    let stats = stream.stats();
    stream.shutdown();
    assert_eq!(stats.ignored.load(Ordering::SeqCst), 1);
    assert_eq!(stats.posted.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.codes(), ["Saw.ar"]);
    assert_eq!(publisher.reply_ids(), ["2"]);
}

#[test]
fn stream_rejects_past_capacity() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let inner = FakeRenderer::new();
    let renderer = Arc::new(GatedRenderer {
        inner: inner.clone(),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let publisher = Arc::new(RecordingPublisher::default());
    let stream = StreamIngestor::start(identity(), dispatcher(renderer, publisher.clone()), 1, 1).unwrap();

    assert_eq!(stream.deliver(mention("1", "a")), Ok(Delivery::Queued));
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    // worker is busy, the single slot takes one more
    assert_eq!(stream.deliver(mention("2", "b")), Ok(Delivery::Queued));
    assert_eq!(stream.deliver(mention("3", "c")), Err(DeliveryError::QueueFull));

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    let stats = stream.stats();
    stream.shutdown();
    assert_eq!(stats.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(stats.posted.load(Ordering::SeqCst), 2);
    assert_eq!(publisher.reply_ids(), ["1", "2"]);
    assert_eq!(inner.codes(), ["a", "b"]);
}

#[test]
fn stream_survives_failed_dispatches() {
    let renderer = FakeRenderer::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let stream = StreamIngestor::start(identity(), dispatcher(renderer, publisher.clone()), 1, 8).unwrap();

    stream.deliver(mention("1", "invalid")).unwrap();
    stream.deliver(mention("2", "SinOsc.ar")).unwrap();
    let stats = stream.stats();
    stream.shutdown();
    assert_eq!(stats.skipped.load(Ordering::SeqCst), 1);
    assert_eq!(stats.posted.load(Ordering::SeqCst), 1);
    assert_eq!(stats.finished(), 2);
    assert_eq!(publisher.reply_ids(), ["2"]);
}
