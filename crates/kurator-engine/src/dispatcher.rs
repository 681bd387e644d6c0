//! Run dispatcher: one accepted request, one pipeline run.

use std::sync::Arc;

use kurator_types::{RunId, RunStatus};
use tokio::sync::Semaphore;

use crate::chain::ChainBuilder;
use crate::config::{ProcessConfig, RunConfig, RunRequest};
use crate::errors::PipelineError;
use crate::result::RunSummary;
use crate::run::{PipelineRun, RunCanceller, RunPolicy};
use crate::source::{ConfiguredSourceFactory, SourceFactory};

/// Cancels the run if the dispatch future is dropped before completion.
struct CancelOnDrop(Option<RunCanceller>);

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(canceller) = self.0.take() {
            canceller.cancel("caller stopped waiting");
        }
    }
}

/// Validates run requests and executes each as an isolated pipeline run.
///
/// Shared by all request handlers; holds only read-only process
/// configuration and the concurrent-run guard.
pub struct RunDispatcher {
    process: Arc<ProcessConfig>,
    builder: Arc<ChainBuilder>,
    sources: Arc<dyn SourceFactory>,
    run_slots: Arc<Semaphore>,
}

impl RunDispatcher {
    #[must_use]
    pub fn new(process: ProcessConfig) -> Self {
        let builder = ChainBuilder::new(&process);
        let sources = ConfiguredSourceFactory::new(process.source.clone());
        let slots = process.pipeline.max_concurrent_runs.max(1);
        Self {
            process: Arc::new(process),
            builder: Arc::new(builder),
            sources: Arc::new(sources),
            run_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    #[must_use]
    pub fn with_chain_builder(mut self, builder: ChainBuilder) -> Self {
        self.builder = Arc::new(builder);
        self
    }

    #[must_use]
    pub fn with_source_factory(mut self, sources: Arc<dyn SourceFactory>) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn process(&self) -> &ProcessConfig {
        &self.process
    }

    /// Validate `request`, run the pipeline, and wait for it to finish.
    ///
    /// Dropping the returned future cancels the run; it still drains in the
    /// background.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Configuration`] for a malformed request
    /// - [`PipelineError::ChainConstruction`] when the sink or source cannot
    ///   be opened
    /// - [`PipelineError::RunFailed`] when the run ends `Failed`
    pub async fn dispatch(&self, request: &RunRequest) -> Result<RunSummary, PipelineError> {
        let config = Arc::new(RunConfig::from_request(request, &self.process)?);
        let run_id = RunId::generate();
        tracing::info!(
            run_id = %run_id,
            limit = config.limit,
            query = %config.query,
            authority = %config.authority,
            workflow = config.workflow.as_deref().unwrap_or("-"),
            tax = config.taxonomic_mode,
            "Run request accepted"
        );

        let _slot = Arc::clone(&self.run_slots)
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("run slots closed: {e}"))?;

        let chain = {
            let builder = Arc::clone(&self.builder);
            let config = Arc::clone(&config);
            let run_id = run_id.clone();
            tokio::task::spawn_blocking(move || builder.build(&config, &run_id))
                .await
                .map_err(|e| anyhow::anyhow!("chain build task failed: {e}"))??
        };
        let source = self.sources.open(&config).await?;

        let mut run = PipelineRun::new(
            run_id,
            config,
            chain,
            source,
            RunPolicy::from_settings(&self.process.pipeline),
        );
        run.start().await?;

        let mut guard = CancelOnDrop(Some(run.canceller()));
        let summary = run.await_completion().await;
        guard.disarm();
        let summary = summary?;

        if summary.status == RunStatus::Failed {
            Err(PipelineError::RunFailed(Box::new(summary)))
        } else {
            Ok(summary)
        }
    }
}
