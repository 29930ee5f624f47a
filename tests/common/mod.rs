#![allow(dead_code)]

use async_trait::async_trait;
use hat_check::{
    Feedback, FeedbackSink, Frame, FrameSource, HatCheckError, HatCheckResult, ScoreEntry,
    ScoreSet, Scorer, StreamProvider, Vocabulary,
};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn vocabulary() -> Vocabulary {
    Vocabulary::new(["head", "hands", "hat"]).unwrap()
}

pub fn hat_wins() -> ScoreSet {
    vec![
        ScoreEntry::new("hat", 0.9),
        ScoreEntry::new("head", 0.07),
        ScoreEntry::new("hands", 0.03),
    ]
}

pub fn head_wins() -> ScoreSet {
    vec![
        ScoreEntry::new("head", 0.9),
        ScoreEntry::new("hat", 0.05),
        ScoreEntry::new("hands", 0.05),
    ]
}

/// Stream whose readiness follows a repeating pattern.
pub struct FakeStream {
    pub ready: Vec<bool>,
    pub size: (u32, u32),
    pub reads: Arc<AtomicUsize>,
    polls: usize,
}

impl FakeStream {
    pub fn new(reads: Arc<AtomicUsize>) -> Self {
        Self {
            ready: vec![true],
            size: (8, 6),
            reads,
            polls: 0,
        }
    }
}

impl FrameSource for FakeStream {
    fn is_frame_ready(&mut self) -> bool {
        let ready = self.ready[self.polls % self.ready.len()];
        self.polls += 1;
        ready
    }

    fn dimensions(&self) -> (u32, u32) {
        self.size
    }

    fn read_frame(&mut self) -> HatCheckResult<RgbImage> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::from_pixel(self.size.0, self.size.1, Rgb([10, 20, 30])))
    }
}

#[derive(Clone, Default)]
pub struct FakeProvider {
    pub deny: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
    pub acquired: Arc<AtomicUsize>,
}

impl StreamProvider for FakeProvider {
    type Handle = FakeStream;

    fn acquire(&mut self) -> HatCheckResult<FakeStream> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(HatCheckError::StreamUnavailable("permission denied".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeStream::new(self.reads.clone()))
    }
}

/// Replays scripted results, then repeats `fallback`.
pub struct ScriptedScorer {
    script: Mutex<VecDeque<Result<ScoreSet, String>>>,
    fallback: ScoreSet,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedScorer {
    pub fn new(fallback: ScoreSet) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_script(self, script: Vec<Result<ScoreSet, String>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn classify(&self, _frame: &Frame, vocabulary: &Vocabulary) -> HatCheckResult<ScoreSet> {
        assert_eq!(vocabulary.labels(), ["head", "hands", "hat"]);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(scores)) => Ok(scores),
            Some(Err(reason)) => Err(HatCheckError::Scoring(reason)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Forwards to a shared scorer so tests can keep inspecting it.
pub struct SharedScorer(pub Arc<ScriptedScorer>);

#[async_trait]
impl Scorer for SharedScorer {
    async fn classify(&self, frame: &Frame, vocabulary: &Vocabulary) -> HatCheckResult<ScoreSet> {
        self.0.classify(frame, vocabulary).await
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Feedback>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Feedback> {
        self.events.lock().unwrap().clone()
    }
}

impl FeedbackSink for RecordingSink {
    fn emit(&self, feedback: Feedback) {
        self.events.lock().unwrap().push(feedback);
    }
}
