//! One attendance pass: acquire a frame, match every face, record matches.

use chrono::{DateTime, FixedOffset};
use rollcall_core::{BoundingBox, FaceExtractor, Identity, Matcher, StudentRecord};
use rollcall_hw::{CaptureError, Frame, FrameSource};
use rollcall_store::{Ledger, LedgerError, RecordOutcome};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no frame within {0:?}")]
    CaptureTimeout(Duration),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("capture cancelled")]
    Cancelled,
    #[error(transparent)]
    Capture(CaptureError),
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::CameraUnavailable(msg) => SessionError::CameraUnavailable(msg),
            other => SessionError::Capture(other),
        }
    }
}

/// Where matched faces are recorded.
pub trait AttendanceLog {
    fn record(
        &self,
        identity: &Identity,
        at: DateTime<FixedOffset>,
    ) -> Result<RecordOutcome, LedgerError>;
}

impl AttendanceLog for Ledger<'_> {
    fn record(
        &self,
        identity: &Identity,
        at: DateTime<FixedOffset>,
    ) -> Result<RecordOutcome, LedgerError> {
        Ledger::record(self, identity, at)
    }
}

/// Frame source shared with the blocking capture task. A timed-out capture
/// keeps the lock until the device returns.
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource + Send>>>;

pub fn shared(source: impl FrameSource + Send + 'static) -> SharedSource {
    let boxed: Box<dyn FrameSource + Send> = Box::new(source);
    Arc::new(Mutex::new(boxed))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Recorded {
        identity: Identity,
        score: f32,
    },
    AlreadyRecordedToday {
        identity: Identity,
        score: f32,
    },
    /// Matched, but the ledger write failed; nothing was stored for this face.
    NotRecorded {
        identity: Identity,
        score: f32,
        reason: String,
    },
    /// Best score seen, if anything was compared.
    Unrecognized {
        score: Option<f32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub bbox: BoundingBox,
    pub verdict: Verdict,
}

/// Result of one pass. No faces means the operator should re-capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub faces: Vec<FaceOutcome>,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn recorded(&self) -> usize {
        self.faces
            .iter()
            .filter(|f| matches!(f.verdict, Verdict::Recorded { .. }))
            .count()
    }
}

/// Everything a pass needs besides the frame.
pub struct Session<'a> {
    pub extractor: &'a mut dyn FaceExtractor,
    pub matcher: &'a dyn Matcher,
    pub gallery: &'a [StudentRecord],
    pub threshold: f32,
    pub ledger: &'a dyn AttendanceLog,
}

impl Session<'_> {
    /// Match and record every face in `frame`.
    ///
    /// Extraction failures count as "no face", and a failed ledger write only
    /// affects its own face: capture noise must not end the session.
    pub fn evaluate(&mut self, frame: &Frame, now: DateTime<FixedOffset>) -> PassReport {
        let faces = match self.extractor.extract_faces(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(
                    seq = frame.sequence,
                    error = %e,
                    "extraction failed, treating as no face"
                );
                Vec::new()
            }
        };

        let mut report = PassReport::default();
        for face in faces {
            let result = self
                .matcher
                .compare(&face.embedding, self.gallery, self.threshold);
            let verdict = match (result.identity, result.score) {
                (Some(identity), Some(score)) => self.record(identity, score, now),
                (_, score) => Verdict::Unrecognized { score },
            };
            tracing::debug!(confidence = face.bbox.confidence, ?verdict, "face evaluated");
            report.faces.push(FaceOutcome {
                bbox: face.bbox,
                verdict,
            });
        }

        tracing::info!(
            faces = report.faces.len(),
            recorded = report.recorded(),
            "attendance pass finished"
        );
        report
    }

    fn record(&self, identity: Identity, score: f32, now: DateTime<FixedOffset>) -> Verdict {
        match self.ledger.record(&identity, now) {
            Ok(RecordOutcome::Recorded(_)) => Verdict::Recorded { identity, score },
            Ok(RecordOutcome::AlreadyRecordedToday) => {
                Verdict::AlreadyRecordedToday { identity, score }
            }
            Err(e) => {
                tracing::error!(roll = %identity.roll, error = %e, "attendance write failed");
                Verdict::NotRecorded {
                    identity,
                    score,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Acquire one frame on a blocking task, bounded by `timeout` and
/// cancellable with Ctrl-C.
///
/// On timeout or cancellation the blocking read is abandoned, not joined.
pub async fn acquire_frame(
    source: &SharedSource,
    timeout: Duration,
) -> Result<Frame, SessionError> {
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = source
            .lock()
            .map_err(|_| CaptureError::CaptureFailed("frame source poisoned".to_string()))?;
        tracing::debug!(source = %guard.describe(), "acquiring frame");
        guard.acquire()
    });

    tokio::select! {
        joined = tokio::time::timeout(timeout, task) => match joined {
            Err(_) => Err(SessionError::CaptureTimeout(timeout)),
            Ok(Err(join)) => Err(SessionError::Capture(CaptureError::CaptureFailed(format!(
                "capture task failed: {join}"
            )))),
            Ok(Ok(result)) => result.map_err(SessionError::from),
        },
        _ = tokio::signal::ctrl_c() => Err(SessionError::Cancelled),
    }
}
