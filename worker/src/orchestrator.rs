// ==============================================================================
// orchestrator.rs - Job Orchestrator
// ==============================================================================
// Description: Accepts submissions, runs each job on its own task and exposes
//              job state, stage re-entry and restart recovery
// Author: Matt Barham
// Created: 2026-09-27
// Modified: 2026-10-16
// Version: 1.2.0
// ==============================================================================

use nutrigen_processor::PipelineStage;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::AnalysisJob;
use crate::job_processor::JobProcessor;
use crate::store::{JobStore, StoreError};

pub const INTERRUPTED_MESSAGE: &str =
    "InternalError: job interrupted by worker restart; please resubmit";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {0} is still processing")]
    JobStillProcessing(Uuid),
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    processor: Arc<JobProcessor>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, processor: Arc<JobProcessor>) -> Self {
        Self { store, processor }
    }

    /// Create a job record and start it in the background
    ///
    /// `job_id` is the submitter's id for the job; a fresh one is generated
    /// when absent. Returns as soon as the record exists. Fails with
    /// ActiveJobExists when the owner already has a job processing.
    pub async fn submit(
        &self,
        owner_id: &str,
        genome_path: &str,
        job_id: Option<Uuid>,
    ) -> Result<Uuid, OrchestratorError> {
        let job = match job_id {
            Some(id) => AnalysisJob::with_id(id, owner_id, genome_path),
            None => AnalysisJob::new(owner_id, genome_path),
        };
        self.store.create(&job).await?;

        let job_id = job.job_id;
        info!("Accepted job {} for owner {}", job_id, owner_id);
        self.spawn(job, PipelineStage::Matching);
        Ok(job_id)
    }

    /// Current record for a job
    pub async fn job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, OrchestratorError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Re-run a finished job starting at `stage`, reusing earlier artifacts
    pub async fn rerun_from(&self, job_id: Uuid, stage: PipelineStage) -> Result<(), OrchestratorError> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))?;

        if !job.status.is_terminal() {
            return Err(OrchestratorError::JobStillProcessing(job_id));
        }

        job.reopen(stage);
        self.store.reopen(&job).await.map_err(|e| match e {
            StoreError::AlreadyProcessing(id) => OrchestratorError::JobStillProcessing(id),
            other => OrchestratorError::Store(other),
        })?;

        info!("Re-running job {} from {}", job_id, stage);
        self.spawn(job, stage);
        Ok(())
    }

    /// Fail jobs left processing by a previous worker instance
    pub async fn recover_stuck_jobs(&self) -> Result<usize, OrchestratorError> {
        let stuck = self.store.processing_jobs().await?;
        if stuck.is_empty() {
            info!("No stuck jobs found");
            return Ok(0);
        }

        let count = stuck.len();
        info!("Found {} stuck job(s), marking as failed", count);
        for mut job in stuck {
            warn!("Marking stuck job as failed: {} (owner: {})", job.job_id, job.owner_id);
            job.fail(INTERRUPTED_MESSAGE);
            self.store.update(&job).await?;
        }

        Ok(count)
    }

    fn spawn(&self, job: AnalysisJob, from: PipelineStage) -> JoinHandle<AnalysisJob> {
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move { processor.run(job, from).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, JobStep};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use nutrigen_processor::enricher::FallbackAssociations;
    use nutrigen_processor::knowledge::{ExternalServiceError, KnowledgeClient, KnowledgeEntry};
    use nutrigen_processor::models::{Direction, VariantAssociation};
    use nutrigen_processor::output::{ArtifactKind, ArtifactStore};
    use nutrigen_processor::reference::{DiseasePriors, ReferenceData, ReferenceTable};
    use nutrigen_processor::{AnalysisPipeline, PipelineConfig};
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::sync::Barrier;
    use std::time::Duration;
    use tempfile::TempDir;

    enum Behaviour {
        Respond(Vec<KnowledgeEntry>),
        Fail,
        Panic,
    }

    struct TestClient {
        behaviour: Behaviour,
        delay: Duration,
    }

    #[async_trait]
    impl KnowledgeClient for TestClient {
        async fn lookup(
            &self,
            _disease_id: &str,
        ) -> Result<Option<Vec<KnowledgeEntry>>, ExternalServiceError> {
            tokio::time::sleep(self.delay).await;
            match &self.behaviour {
                Behaviour::Respond(entries) => Ok(Some(entries.clone())),
                Behaviour::Fail => Err(ExternalServiceError::Status(503)),
                Behaviour::Panic => panic!("knowledge client exploded"),
            }
        }
    }

    /// Memory store that remembers every progress value written
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryJobStore,
        history: Mutex<Vec<(u8, JobStatus)>>,
        /// When set, reads wait for each other before returning
        read_gate: Mutex<Option<Arc<Barrier>>>,
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
            self.inner.create(job).await
        }

        async fn update(&self, job: &AnalysisJob) -> Result<(), StoreError> {
            self.inner.update(job).await?;
            self.history
                .lock()
                .unwrap()
                .push((job.progress_percent, job.status));
            Ok(())
        }

        async fn reopen(&self, job: &AnalysisJob) -> Result<(), StoreError> {
            self.inner.reopen(job).await?;
            self.history
                .lock()
                .unwrap()
                .push((job.progress_percent, job.status));
            Ok(())
        }

        async fn get(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
            let job = self.inner.get(job_id).await?;
            let gate = self.read_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                if gate.wait().await.is_leader() {
                    self.read_gate.lock().unwrap().take();
                }
            }
            Ok(job)
        }

        async fn processing_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError> {
            self.inner.processing_jobs().await
        }
    }

    fn spinach() -> Vec<KnowledgeEntry> {
        vec![KnowledgeEntry {
            ingredient: "Spinach".to_string(),
            direction: Direction::Prefer,
            confidence: 0.8,
            evidence_id: None,
        }]
    }

    fn association(variant: &str, effect: f64, frequency: f64) -> VariantAssociation {
        VariantAssociation {
            variant_id: variant.to_string(),
            trait_name: "D1".to_string(),
            risk_allele: "A".to_string(),
            effect_size: effect,
            population_frequency: Some(frequency),
            nutrition_relevant: true,
        }
    }

    fn orchestrator(
        data_dir: &Path,
        store: Arc<dyn JobStore>,
        behaviour: Behaviour,
        delay: Duration,
    ) -> Orchestrator {
        let table = ReferenceTable::from_associations(vec![
            association("rs1", 0.2, 0.3),
            association("rs2", 0.3, 0.4),
            association("rs3", 0.1, 0.2),
        ]);
        let fallback = FallbackAssociations::from_json_str(
            r#"{"D1": [{"ingredient": "kale", "direction": "prefer", "confidence": 0.5}]}"#,
        )
        .unwrap();

        let mut config = PipelineConfig::default();
        config.ranker.threshold = 0.0;
        config.estimator.simulation_count = 500;
        config.enricher.max_attempts = 2;
        config.enricher.retry_delay_ms = 0;
        config.enricher.request_delay_ms = Some(0);

        let pipeline = AnalysisPipeline::new(
            Arc::new(ReferenceData::new(table, DiseasePriors::default())),
            Arc::new(TestClient { behaviour, delay }),
            Arc::new(fallback),
            config,
        );
        let processor = JobProcessor::new(
            Arc::new(pipeline),
            Arc::clone(&store),
            data_dir.to_path_buf(),
            None,
        );
        Orchestrator::new(store, Arc::new(processor))
    }

    fn write_genome(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    const GENOME: &str = "# rsid\tchromosome\tposition\tgenotype\nrs1\t1\t100\tAA\nrs2\t1\t200\tAG\nrs3\t2\t300\tGG\n";

    async fn wait_for_terminal(orchestrator: &Orchestrator, job_id: Uuid) -> AnalysisJob {
        for _ in 0..500 {
            if let Some(job) = orchestrator.job(job_id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    #[tokio::test]
    async fn test_job_completes_with_all_artifacts() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let orch = orchestrator(temp.path(), store.clone(), Behaviour::Respond(spinach()), Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        let job = wait_for_terminal(&orch, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.current_step, JobStep::Completed);
        assert_eq!(job.progress_percent, 100);
        assert!(job.error_message.is_none());
        for kind in ArtifactKind::ALL {
            assert!(job.artifacts.get(kind).is_some(), "missing {}", kind);
        }

        let artifacts = ArtifactStore::for_job(temp.path(), "alice", &job_id.to_string()).unwrap();
        let set: nutrigen_processor::models::RecommendationSet =
            artifacts.read(ArtifactKind::Recommendations).unwrap();
        let spinach = set.find("spinach").unwrap();
        assert!((spinach.aggregate_score - 0.8).abs() < 1e-12);
        assert_eq!(spinach.supporting_disease_count, 1);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let orch = orchestrator(temp.path(), store.clone(), Behaviour::Respond(spinach()), Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        wait_for_terminal(&orch, job_id).await;

        let history = store.history.lock().unwrap().clone();
        let values: Vec<u8> = history.iter().map(|(p, _)| *p).collect();
        assert_eq!(values, vec![10, 30, 35, 50, 55, 65, 70, 85, 90, 100, 100]);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_unparsable_genome_fails_at_matching() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(temp.path(), store, Behaviour::Respond(spinach()), Duration::ZERO);
        let genome = write_genome(temp.path(), "empty.txt", "# nothing here\nnot\ta\tvalid row\n");

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        let job = wait_for_terminal(&orch, job_id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.current_step, JobStep::Stage(PipelineStage::Matching));
        assert_eq!(job.progress_percent, 10);
        let message = job.error_message.unwrap();
        assert!(message.starts_with("InputFormatError:"), "{}", message);
        assert!(job.artifacts.matched_variants.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_knowledge_service_degrades() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(temp.path(), store, Behaviour::Fail, Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        let job = wait_for_terminal(&orch, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let artifacts = ArtifactStore::for_job(temp.path(), "alice", &job_id.to_string()).unwrap();
        let set: nutrigen_processor::models::RecommendationSet =
            artifacts.read(ArtifactKind::Recommendations).unwrap();
        assert!(set.find("kale").is_some());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(temp.path(), store, Behaviour::Panic, Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        let job = wait_for_terminal(&orch, job_id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().starts_with("InternalError:"));
        assert_eq!(job.current_step, JobStep::Stage(PipelineStage::Enriching));
    }

    #[tokio::test]
    async fn test_one_active_job_per_owner() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(
            temp.path(),
            store,
            Behaviour::Respond(spinach()),
            Duration::from_millis(300),
        );
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let first = orch.submit("alice", &genome, None).await.unwrap();
        let second = orch.submit("alice", &genome, None).await;
        assert_eq!(
            second,
            Err(OrchestratorError::Store(StoreError::ActiveJobExists("alice".to_string())))
        );

        let other = orch.submit("bob", &genome, None).await.unwrap();
        wait_for_terminal(&orch, first).await;
        wait_for_terminal(&orch, other).await;

        // Free again once the first job is done
        let third = orch.submit("alice", &genome, None).await.unwrap();
        assert_eq!(wait_for_terminal(&orch, third).await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_rerun_from_aggregation() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(temp.path(), store, Behaviour::Respond(spinach()), Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        let first = wait_for_terminal(&orch, job_id).await;

        // Genome removed: only persisted artifacts can satisfy the rerun
        std::fs::remove_file(&genome).unwrap();
        orch.rerun_from(job_id, PipelineStage::Aggregating).await.unwrap();
        let rerun = wait_for_terminal(&orch, job_id).await;

        assert_eq!(rerun.status, JobStatus::Completed);
        assert_eq!(rerun.artifacts, first.artifacts);
        assert!(rerun.started_at >= first.started_at);
    }

    #[tokio::test]
    async fn test_concurrent_reruns_start_one_run() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::default());
        let orch = orchestrator(temp.path(), store.clone(), Behaviour::Respond(spinach()), Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        wait_for_terminal(&orch, job_id).await;
        store.history.lock().unwrap().clear();
        *store.read_gate.lock().unwrap() = Some(Arc::new(Barrier::new(2)));

        // Both calls read the finished record before either writes
        let (a, b) = tokio::join!(
            orch.rerun_from(job_id, PipelineStage::Aggregating),
            orch.rerun_from(job_id, PipelineStage::Aggregating)
        );
        let mut results = vec![a, b];
        results.sort_by_key(|r| r.is_err());
        assert_eq!(results[0], Ok(()));
        assert_eq!(results[1], Err(OrchestratorError::JobStillProcessing(job_id)));

        let job = wait_for_terminal(&orch, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // One reopen plus a single aggregating run
        let values: Vec<u8> = store.history.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(values, vec![90, 90, 100, 100]);
    }

    #[tokio::test]
    async fn test_rerun_while_processing_is_refused() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(
            temp.path(),
            store,
            Behaviour::Respond(spinach()),
            Duration::from_millis(300),
        );
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let job_id = orch.submit("alice", &genome, None).await.unwrap();
        assert_eq!(
            orch.rerun_from(job_id, PipelineStage::Ranking).await,
            Err(OrchestratorError::JobStillProcessing(job_id))
        );
        wait_for_terminal(&orch, job_id).await;
    }

    #[tokio::test]
    async fn test_submit_with_chosen_id() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(temp.path(), store, Behaviour::Respond(spinach()), Duration::ZERO);
        let genome = write_genome(temp.path(), "genome.txt", GENOME);

        let chosen = Uuid::new_v4();
        assert_eq!(orch.submit("alice", &genome, Some(chosen)).await, Ok(chosen));
        let job = wait_for_terminal(&orch, chosen).await;
        assert_eq!(job.owner_id, "alice");

        // Reusing the id never overwrites the finished record
        assert_eq!(
            orch.submit("bob", &genome, Some(chosen)).await,
            Err(OrchestratorError::Store(StoreError::DuplicateJob(chosen)))
        );
        assert_eq!(orch.job(chosen).await.unwrap().unwrap().owner_id, "alice");
    }

    #[tokio::test]
    async fn test_rerun_unknown_job() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(temp.path(), store, Behaviour::Fail, Duration::ZERO);

        let missing = Uuid::new_v4();
        assert_eq!(
            orch.rerun_from(missing, PipelineStage::Ranking).await,
            Err(OrchestratorError::JobNotFound(missing))
        );
    }

    #[tokio::test]
    async fn test_recover_stuck_jobs() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let stuck = AnalysisJob::new("alice", "/data/a.txt");
        store.create(&stuck).await.unwrap();
        let orch = orchestrator(temp.path(), store, Behaviour::Fail, Duration::ZERO);

        assert_eq!(orch.recover_stuck_jobs().await.unwrap(), 1);
        let job = orch.job(stuck.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(orch.recover_stuck_jobs().await.unwrap(), 0);
    }
}
