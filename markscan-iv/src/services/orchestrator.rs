//! Scan orchestration
//!
//! Drives a batch lot scan or a single manual scan: submits each image to
//! the classification client, turns each response (or failure) into a
//! durable inspection record, reports progress over the event bus.
//!
//! Batch runs are strictly sequential. A single image's failure never
//! aborts the batch: the image is recorded as an unverified failure and
//! the run continues. Image display handles acquired during a run are
//! scoped to the run and released on every exit path.

use chrono::Utc;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use markscan_common::events::{EventBus, MarkScanEvent};
use markscan_common::models::{MANUAL_SENTINEL, MANUAL_VENDOR, OPERATOR_AUTO};
use markscan_common::{Error, InspectionRecord, Lot, Result, ScanImage, ScanResult};

use crate::db::records;
use crate::models::{ScanSession, ScanState};
use crate::services::classifier::{Classify, ScanMetadata, Verdict};

/// Default pacing delay between batch items
pub const DEFAULT_PACING_MS: u64 = 500;

/// Reduce a client-supplied file name to its basename.
///
/// Upload names are attacker-controlled; a name like `../../x` must not
/// escape the uploads tree, either when written or when removed on
/// release.
fn sanitize_file_name(name: &str) -> String {
    match std::path::Path::new(name).file_name() {
        Some(base) => base.to_string_lossy().into_owned(),
        None => "image.bin".to_string(),
    }
}

/// Transient display copies of scanned images, scoped to one run.
///
/// Dropping the set removes every stored file, so release is guaranteed
/// on normal completion, cancellation, and error paths alike.
struct ImageHandles {
    dir: PathBuf,
    stored: Vec<PathBuf>,
}

impl ImageHandles {
    fn new(uploads_dir: &PathBuf, session_id: Uuid) -> Self {
        Self {
            dir: uploads_dir.join(session_id.to_string()),
            stored: Vec::new(),
        }
    }

    /// Store one image for display and return its serving reference.
    fn acquire(&mut self, image: &ScanImage) -> Result<String> {
        let file_name = sanitize_file_name(&image.file_name);
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&file_name);
        std::fs::write(&path, &image.data)?;
        self.stored.push(path);

        let session_dir = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("/uploads/{}/{}", session_dir, file_name))
    }
}

impl Drop for ImageHandles {
    fn drop(&mut self) {
        for path in &self.stored {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove scan image");
            }
        }
        // Best effort; the directory may already be gone.
        let _ = std::fs::remove_dir(&self.dir);
    }
}

/// Verdict held after a manual classification, awaiting the operator's
/// explicit pass/fail decision. No record exists until it is committed.
#[derive(Debug, Clone)]
pub struct PendingVerdict {
    pub verdict: Verdict,
    pub operator: String,
    pub image_ref: Option<String>,
}

/// Orchestrates batch and manual scans
pub struct ScanOrchestrator<C: Classify> {
    db: SqlitePool,
    event_bus: EventBus,
    classifier: Arc<C>,
    uploads_dir: PathBuf,
    pacing: Duration,
}

impl<C: Classify> ScanOrchestrator<C> {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        classifier: Arc<C>,
        uploads_dir: PathBuf,
        pacing: Duration,
    ) -> Self {
        Self {
            db,
            event_bus,
            classifier,
            uploads_dir,
            pacing,
        }
    }

    /// Execute a batch scan over a lot.
    ///
    /// Processes the lot's images one at a time, in order. Each image
    /// yields exactly one inspection record: the classifier's verdict on
    /// success, a fallback fail record at zero confidence otherwise.
    /// Cancellation is honored before each image's classification call.
    ///
    /// The session must be freshly created (Idle); a session that has
    /// already run is rejected, which guards re-entrant starts.
    pub async fn run_lot(
        &self,
        lot: Lot,
        mut session: ScanSession,
        cancel_token: CancellationToken,
    ) -> Result<ScanSession> {
        lot.validate()?;
        session.start()?;

        let total = lot.images.len();
        tracing::info!(
            session_id = %session.session_id,
            vendor = %lot.vendor,
            lot_id = %lot.lot_id,
            total_images = total,
            "Starting batch scan"
        );

        self.event_bus.emit_lossy(MarkScanEvent::ScanSessionStarted {
            session_id: session.session_id,
            vendor: lot.vendor.clone(),
            lot_id: lot.lot_id.clone(),
            total_images: total,
            timestamp: Utc::now(),
        });

        let metadata = ScanMetadata {
            vendor: lot.vendor.clone(),
            lot_id: lot.lot_id.clone(),
            part_number: lot.part_number.clone(),
            operator: OPERATOR_AUTO.to_string(),
        };

        // Display handles for every image of this run; released when this
        // function returns on any path.
        let mut handles = ImageHandles::new(&self.uploads_dir, session.session_id);

        let mut records_created = 0usize;
        let mut fallbacks = 0usize;

        for (idx, image) in lot.images.iter().enumerate() {
            // Cancellation point: before submitting the next image's call.
            if cancel_token.is_cancelled() {
                tracing::info!(
                    session_id = %session.session_id,
                    images_processed = idx,
                    "Batch scan cancelled"
                );
                session.transition_to(ScanState::Cancelled);
                self.event_bus
                    .emit_lossy(MarkScanEvent::ScanSessionCancelled {
                        session_id: session.session_id,
                        images_processed: idx,
                        timestamp: Utc::now(),
                    });
                return Ok(session);
            }

            let image_ref = match handles.acquire(image) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        file = %image.file_name,
                        error = %e,
                        "Failed to store display copy (record will have no image)"
                    );
                    None
                }
            };

            let record = match self.classifier.classify(image, &metadata).await {
                Ok(verdict) => InspectionRecord::new(
                    &lot.vendor,
                    &lot.lot_id,
                    &lot.part_number,
                    verdict.result,
                    verdict.confidence,
                    OPERATOR_AUTO,
                    image_ref,
                ),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        file = %image.file_name,
                        error = %e,
                        "Classification failed, recording fallback fail"
                    );
                    fallbacks += 1;
                    InspectionRecord::fallback(
                        &lot.vendor,
                        &lot.lot_id,
                        &lot.part_number,
                        OPERATOR_AUTO,
                        image_ref,
                    )
                }
            };

            match records::append_record(&self.db, &record).await {
                Ok(()) => {
                    records_created += 1;
                    self.event_bus.emit_lossy(MarkScanEvent::RecordAdded {
                        record,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    // Store failure is non-fatal to the batch; the verdict
                    // was still produced and progress continues.
                    tracing::warn!(
                        session_id = %session.session_id,
                        file = %image.file_name,
                        error = %e,
                        "Failed to persist inspection record"
                    );
                }
            }

            session.update_progress(idx + 1);
            self.event_bus.emit_lossy(MarkScanEvent::ScanProgress {
                session_id: session.session_id,
                current: idx + 1,
                total,
                percentage: session.progress.percentage,
                timestamp: Utc::now(),
            });

            // Pacing delay between items; throttles the perceived scan
            // rate, skipped after the final image.
            if idx + 1 < total && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        session.transition_to(ScanState::Completed);
        self.event_bus
            .emit_lossy(MarkScanEvent::ScanSessionCompleted {
                session_id: session.session_id,
                records_created,
                fallbacks,
                timestamp: Utc::now(),
            });

        tracing::info!(
            session_id = %session.session_id,
            records_created = records_created,
            fallbacks = fallbacks,
            "Batch scan completed"
        );

        Ok(session)
    }

    /// Classify a single manually selected image.
    ///
    /// Requires an image; fails with a validation error before any
    /// network call otherwise. On success the verdict is held pending -
    /// no record is written until the operator commits a decision.
    /// On classification failure the error is surfaced and no record is
    /// left behind; the operator may retry.
    pub async fn manual_classify(
        &self,
        image: Option<ScanImage>,
        operator: &str,
    ) -> Result<PendingVerdict> {
        let image = image.ok_or_else(|| Error::InvalidInput("No image selected".into()))?;

        let metadata = ScanMetadata {
            vendor: MANUAL_VENDOR.to_string(),
            lot_id: MANUAL_SENTINEL.to_string(),
            part_number: MANUAL_SENTINEL.to_string(),
            operator: operator.to_string(),
        };

        let verdict = self
            .classifier
            .classify(&image, &metadata)
            .await
            .map_err(|e| Error::Classification(e.to_string()))?;

        // Manual display copies live under a fixed subdirectory and are
        // not scoped to a run; they back the pending verdict until commit.
        // Stored only after classification succeeds, so a failed call
        // leaves nothing behind to orphan.
        let file_name = sanitize_file_name(&image.file_name);
        let manual_dir = self.uploads_dir.join("manual");
        let image_ref = match std::fs::create_dir_all(&manual_dir)
            .and_then(|_| std::fs::write(manual_dir.join(&file_name), &image.data))
        {
            Ok(()) => Some(format!("/uploads/manual/{}", file_name)),
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "Failed to store manual scan image");
                None
            }
        };

        tracing::info!(
            operator = operator,
            result = %verdict.result,
            confidence = verdict.confidence,
            "Manual classification complete, awaiting operator decision"
        );

        Ok(PendingVerdict {
            verdict,
            operator: operator.to_string(),
            image_ref,
        })
    }

    /// Commit a pending manual verdict with the operator's decision.
    ///
    /// The decision may disagree with the classifier's verdict; the
    /// operator's choice is what gets recorded. Exactly one record is
    /// created per commit.
    pub async fn commit_manual(
        &self,
        pending: PendingVerdict,
        decision: ScanResult,
    ) -> Result<InspectionRecord> {
        if decision == ScanResult::Overridden {
            return Err(Error::InvalidInput(
                "Manual decision must be pass or fail".into(),
            ));
        }

        let record = InspectionRecord::new(
            MANUAL_VENDOR,
            MANUAL_SENTINEL,
            MANUAL_SENTINEL,
            decision,
            pending.verdict.confidence,
            pending.operator,
            pending.image_ref,
        );

        records::append_record(&self.db, &record).await?;
        self.event_bus.emit_lossy(MarkScanEvent::RecordAdded {
            record: record.clone(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            record_id = %record.id,
            decision = %record.result,
            "Manual scan committed"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::services::classifier::{ClassifierError, Detection, verdict_from_detections};
    use std::sync::Mutex;

    // `super::Result` is the crate-wide single-parameter alias; the
    // classifier seam returns its own error type.
    type ClassifyOutcome = std::result::Result<Verdict, ClassifierError>;

    /// Scripted classifier: pops one outcome per call, in order.
    struct ScriptedClassifier {
        outcomes: Mutex<Vec<ClassifyOutcome>>,
    }

    impl ScriptedClassifier {
        fn new(outcomes: Vec<ClassifyOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }

        fn detection(label: &str, confidence: f64) -> ClassifyOutcome {
            Ok(verdict_from_detections(&[Detection {
                label: label.into(),
                confidence,
            }]))
        }
    }

    impl Classify for ScriptedClassifier {
        async fn classify(
            &self,
            _image: &ScanImage,
            _metadata: &ScanMetadata,
        ) -> ClassifyOutcome {
            self.outcomes.lock().unwrap().remove(0)
        }
    }

    fn test_lot(n: usize) -> Lot {
        Lot {
            vendor: "Acme".into(),
            lot_id: "LOT-1".into(),
            part_number: "PN-1".into(),
            images: (0..n)
                .map(|i| ScanImage {
                    file_name: format!("img{}.jpg", i),
                    data: vec![0u8; 8],
                })
                .collect(),
        }
    }

    fn orchestrator<C: Classify>(
        db: SqlitePool,
        classifier: C,
        uploads: PathBuf,
    ) -> (ScanOrchestrator<C>, EventBus) {
        let bus = EventBus::new(64);
        let orch = ScanOrchestrator::new(
            db,
            bus.clone(),
            Arc::new(classifier),
            uploads,
            Duration::ZERO,
        );
        (orch, bus)
    }

    #[tokio::test]
    async fn batch_run_scenario_with_fallback() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier = ScriptedClassifier::new(vec![
            ScriptedClassifier::detection("Defective", 0.92),
            ScriptedClassifier::detection("Perfect", 0.88),
            Err(ClassifierError::Network("connection refused".into())),
        ]);
        let (orch, bus) = orchestrator(pool.clone(), classifier, uploads.path().to_path_buf());
        let mut rx = bus.subscribe();

        let lot = test_lot(3);
        let session = ScanSession::new(&lot);
        let done = orch
            .run_lot(lot, session, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(done.state, ScanState::Completed);

        // Exactly n records, each carrying the lot's metadata.
        let records = crate::db::records::list_records(&pool).await.unwrap();
        assert_eq!(records.len(), 3);
        for r in &records {
            assert_eq!(r.vendor, "Acme");
            assert_eq!(r.lot_id, "LOT-1");
            assert_eq!(r.part_number, "PN-1");
            assert_eq!(r.operator, OPERATOR_AUTO);
        }

        // Records listed newest first: [fallback, pass@0.88, fail@0.92].
        assert_eq!(records[0].result, ScanResult::Fail);
        assert_eq!(records[0].confidence, 0.0);
        assert_eq!(records[1].result, ScanResult::Pass);
        assert!((records[1].confidence - 0.88).abs() < 1e-9);
        assert_eq!(records[2].result, ScanResult::Fail);
        assert!((records[2].confidence - 0.92).abs() < 1e-9);

        // Progress events: 33.3, 66.7, 100, non-decreasing.
        let mut percentages = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let MarkScanEvent::ScanProgress { percentage, .. } = ev {
                percentages.push(percentage);
            }
        }
        assert_eq!(percentages.len(), 3);
        assert!((percentages[0] - 100.0 / 3.0).abs() < 0.1);
        assert!((percentages[1] - 200.0 / 3.0).abs() < 0.1);
        assert_eq!(percentages[2], 100.0);
        assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn record_added_fires_once_per_record() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier = ScriptedClassifier::new(vec![
            ScriptedClassifier::detection("Perfect", 0.9),
            ScriptedClassifier::detection("Perfect", 0.8),
        ]);
        let (orch, bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());
        let mut rx = bus.subscribe();

        let lot = test_lot(2);
        let session = ScanSession::new(&lot);
        orch.run_lot(lot, session, CancellationToken::new())
            .await
            .unwrap();

        let mut added = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, MarkScanEvent::RecordAdded { .. }) {
                added += 1;
            }
        }
        assert_eq!(added, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_image_and_releases_handles() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier = ScriptedClassifier::new(vec![]);
        let (orch, _bus) = orchestrator(pool.clone(), classifier, uploads.path().to_path_buf());

        let lot = test_lot(3);
        let session = ScanSession::new(&lot);
        let session_id = session.session_id;

        let token = CancellationToken::new();
        token.cancel();

        let done = orch.run_lot(lot, session, token).await.unwrap();
        assert_eq!(done.state, ScanState::Cancelled);
        assert_eq!(
            crate::db::records::list_records(&pool).await.unwrap().len(),
            0
        );
        // No display copies left behind.
        assert!(!uploads.path().join(session_id.to_string()).exists());
    }

    #[tokio::test]
    async fn completed_run_releases_display_handles() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier =
            ScriptedClassifier::new(vec![ScriptedClassifier::detection("Perfect", 0.9)]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());

        let lot = test_lot(1);
        let session = ScanSession::new(&lot);
        let session_id = session.session_id;

        orch.run_lot(lot, session, CancellationToken::new())
            .await
            .unwrap();

        assert!(!uploads.path().join(session_id.to_string()).exists());
    }

    #[tokio::test]
    async fn session_cannot_be_rerun() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier =
            ScriptedClassifier::new(vec![ScriptedClassifier::detection("Perfect", 0.9)]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());

        let lot = test_lot(1);
        let session = ScanSession::new(&lot);
        let done = orch
            .run_lot(lot.clone(), session, CancellationToken::new())
            .await
            .unwrap();

        // Re-triggering with the already-run session is refused outright.
        assert!(orch
            .run_lot(lot, done, CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn manual_scan_requires_an_image() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier = ScriptedClassifier::new(vec![]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());

        match orch.manual_classify(None, "K. Joshi").await {
            Err(Error::InvalidInput(_)) => {}
            other => panic!("expected InvalidInput, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn manual_failure_surfaces_and_leaves_no_record() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier =
            ScriptedClassifier::new(vec![Err(ClassifierError::Api(500, "Model not loaded.".into()))]);
        let (orch, _bus) = orchestrator(pool.clone(), classifier, uploads.path().to_path_buf());

        let image = ScanImage {
            file_name: "chip.jpg".into(),
            data: vec![1, 2, 3],
        };
        match orch.manual_classify(Some(image), "K. Joshi").await {
            Err(Error::Classification(msg)) => assert!(msg.contains("Model not loaded.")),
            other => panic!("expected Classification error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(
            crate::db::records::list_records(&pool).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn manual_commit_uses_operator_decision() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        // Classifier says pass; operator flags it as fail anyway.
        let classifier =
            ScriptedClassifier::new(vec![ScriptedClassifier::detection("Perfect", 0.77)]);
        let (orch, _bus) = orchestrator(pool.clone(), classifier, uploads.path().to_path_buf());

        let image = ScanImage {
            file_name: "chip.jpg".into(),
            data: vec![1, 2, 3],
        };
        let pending = orch.manual_classify(Some(image), "K. Joshi").await.unwrap();
        assert_eq!(pending.verdict.result, ScanResult::Pass);

        // Verdict is pending: nothing committed yet.
        assert_eq!(
            crate::db::records::list_records(&pool).await.unwrap().len(),
            0
        );

        let record = orch
            .commit_manual(pending, ScanResult::Fail)
            .await
            .unwrap();
        assert_eq!(record.result, ScanResult::Fail);
        assert_eq!(record.vendor, MANUAL_VENDOR);
        assert_eq!(record.lot_id, MANUAL_SENTINEL);
        assert!((record.confidence - 0.77).abs() < 1e-9);

        let records = crate::db::records::list_records(&pool).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn manual_commit_rejects_overridden_decision() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier = ScriptedClassifier::new(vec![]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());

        let pending = PendingVerdict {
            verdict: Verdict {
                result: ScanResult::Pass,
                confidence: 0.5,
            },
            operator: "K. Joshi".into(),
            image_ref: None,
        };
        assert!(orch
            .commit_manual(pending, ScanResult::Overridden)
            .await
            .is_err());
    }

    #[test]
    fn file_names_are_reduced_to_their_basename() {
        assert_eq!(sanitize_file_name("chip.jpg"), "chip.jpg");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("/abs/path/chip.jpg"), "chip.jpg");
        assert_eq!(sanitize_file_name(".."), "image.bin");
        assert_eq!(sanitize_file_name(""), "image.bin");
    }

    #[tokio::test]
    async fn traversal_file_name_cannot_escape_the_uploads_tree() {
        let pool = test_pool().await;
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("uploads");

        // A file outside the uploads tree that a traversal name would
        // overwrite on store and delete on release.
        let victim = root.path().join("victim.bin");
        std::fs::write(&victim, b"untouched").unwrap();

        let classifier =
            ScriptedClassifier::new(vec![ScriptedClassifier::detection("Perfect", 0.9)]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.clone());

        let lot = Lot {
            vendor: "Acme".into(),
            lot_id: "LOT-1".into(),
            part_number: "PN-1".into(),
            images: vec![ScanImage {
                file_name: "../victim.bin".into(),
                data: vec![9u8; 4],
            }],
        };
        let session = ScanSession::new(&lot);
        orch.run_lot(lot, session, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&victim).unwrap(), b"untouched");
    }

    #[tokio::test]
    async fn manual_traversal_name_is_stored_under_manual_dir() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier =
            ScriptedClassifier::new(vec![ScriptedClassifier::detection("Perfect", 0.9)]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());

        let image = ScanImage {
            file_name: "../../escape.jpg".into(),
            data: vec![1, 2, 3],
        };
        let pending = orch.manual_classify(Some(image), "K. Joshi").await.unwrap();

        assert_eq!(pending.image_ref.as_deref(), Some("/uploads/manual/escape.jpg"));
        assert!(uploads.path().join("manual").join("escape.jpg").exists());
        assert!(!uploads.path().join("escape.jpg").exists());
    }

    #[tokio::test]
    async fn failed_manual_classification_stores_no_display_copy() {
        let pool = test_pool().await;
        let uploads = tempfile::tempdir().unwrap();
        let classifier =
            ScriptedClassifier::new(vec![Err(ClassifierError::Network("refused".into()))]);
        let (orch, _bus) = orchestrator(pool, classifier, uploads.path().to_path_buf());

        let image = ScanImage {
            file_name: "chip.jpg".into(),
            data: vec![1, 2, 3],
        };
        assert!(orch.manual_classify(Some(image), "K. Joshi").await.is_err());

        // Nothing written for the failed call; retries do not accumulate
        // orphaned copies.
        assert!(!uploads.path().join("manual").exists());
    }
}
