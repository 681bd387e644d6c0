//! Stage chain construction.
//!
//! The topology is fixed: name → basis-of-record → date → georeference →
//! sink. The only branch point is the name stage, whose implementation is
//! looked up by naming authority in a [`NameStageRegistry`] once per run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kurator_sink::{SinkError, SqliteSummarySink, SummarySink};
use kurator_types::{RunId, StageKind};

use crate::config::{ProcessConfig, RunConfig, ServiceConfig};
use crate::errors::PipelineError;
use crate::stage::{SinkStage, Stage, ValidationStage};
use crate::validators::{
    BasisOfRecordValidator, EventDateValidator, GeoreferenceValidator, GlobalNamesValidator,
    ScientificNameValidator,
};

/// Reserved authority token selecting the GlobalNames name stage.
pub const GLOBAL_NAMES_AUTHORITY: &str = "GLOBALNAMES";

/// Inputs available to a name stage constructor.
#[derive(Debug, Clone, Copy)]
pub struct NameStageContext<'a> {
    /// Authority exactly as requested.
    pub authority: &'a str,
    pub taxonomic_mode: bool,
    pub services: &'a ServiceConfig,
    pub timeout: Duration,
}

pub type NameStageCtor = fn(&NameStageContext<'_>) -> Arc<dyn Stage>;

fn global_names_stage(ctx: &NameStageContext<'_>) -> Arc<dyn Stage> {
    Arc::new(ValidationStage::new(
        GlobalNamesValidator::new(ctx.services.global_names.clone()),
        ctx.timeout,
    ))
}

fn generic_name_stage(ctx: &NameStageContext<'_>) -> Arc<dyn Stage> {
    let validator = ScientificNameValidator::new(
        ctx.services.scientific_name.clone(),
        ctx.authority,
        ctx.taxonomic_mode,
    )
    .with_cache(true)
    .with_guid_insertion(true);
    Arc::new(ValidationStage::new(validator, ctx.timeout))
}

/// Maps naming authorities to name stage constructors.
///
/// Keys compare case-insensitively; authorities without an entry resolve to
/// the fallback constructor.
#[derive(Clone)]
pub struct NameStageRegistry {
    by_authority: HashMap<String, NameStageCtor>,
    fallback: NameStageCtor,
}

impl NameStageRegistry {
    /// Registry with the GlobalNames entry and the generic fallback.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            by_authority: HashMap::new(),
            fallback: generic_name_stage,
        };
        registry.register(GLOBAL_NAMES_AUTHORITY, global_names_stage);
        registry
    }

    pub fn register(&mut self, authority: &str, ctor: NameStageCtor) {
        self.by_authority
            .insert(authority.to_uppercase(), ctor);
    }

    #[must_use]
    pub fn resolve(&self, authority: &str) -> NameStageCtor {
        self.by_authority
            .get(&authority.to_uppercase())
            .copied()
            .unwrap_or(self.fallback)
    }

    #[must_use]
    pub fn build(&self, ctx: &NameStageContext<'_>) -> Arc<dyn Stage> {
        (self.resolve(ctx.authority))(ctx)
    }
}

impl Default for NameStageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Opens the summary sink for a run's output target.
pub trait SinkFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SinkError`] when the target cannot be opened.
    fn open(&self, target: &str) -> Result<Arc<dyn SummarySink>, SinkError>;
}

/// Opens a fresh `SQLite` connection per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteSinkFactory;

impl SinkFactory for SqliteSinkFactory {
    fn open(&self, target: &str) -> Result<Arc<dyn SummarySink>, SinkError> {
        Ok(Arc::new(SqliteSummarySink::open_target(target)?))
    }
}

/// An ordered, linked set of stages for one run, ending at the sink stage.
pub struct StageChain {
    stages: Vec<Arc<dyn Stage>>,
    sink: Arc<dyn SummarySink>,
}

impl StageChain {
    /// Assemble a chain from already-built stages. The last stage is treated
    /// as the chain end.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ChainConstruction`] for an empty stage list.
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        sink: Arc<dyn SummarySink>,
    ) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::ChainConstruction(
                "a chain needs at least one stage".to_string(),
            ));
        }
        Ok(Self { stages, sink })
    }

    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn SummarySink> {
        &self.sink
    }

    pub(crate) fn into_parts(self) -> (Vec<Arc<dyn Stage>>, Arc<dyn SummarySink>) {
        (self.stages, self.sink)
    }
}

/// Builds the fixed five-stage chain for a run.
pub struct ChainBuilder {
    services: ServiceConfig,
    stage_timeout: Duration,
    registry: NameStageRegistry,
    sinks: Arc<dyn SinkFactory>,
}

impl ChainBuilder {
    #[must_use]
    pub fn new(process: &ProcessConfig) -> Self {
        Self {
            services: process.services.clone(),
            stage_timeout: process.pipeline.stage_timeout(),
            registry: NameStageRegistry::with_defaults(),
            sinks: Arc::new(SqliteSinkFactory),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: NameStageRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_sink_factory(mut self, sinks: Arc<dyn SinkFactory>) -> Self {
        self.sinks = sinks;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &NameStageRegistry {
        &self.registry
    }

    /// Build the chain for one run. The sink is opened first so an
    /// unusable output target fails before any record is admitted. May block
    /// on sink I/O.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ChainConstruction`] when the sink target
    /// cannot be opened.
    pub fn build(&self, run: &RunConfig, run_id: &RunId) -> Result<StageChain, PipelineError> {
        let sink = self.sinks.open(&run.output_target).map_err(|e| {
            PipelineError::ChainConstruction(format!(
                "cannot open output target '{}': {e}",
                run.output_target
            ))
        })?;

        let ctx = NameStageContext {
            authority: &run.authority,
            taxonomic_mode: run.taxonomic_mode,
            services: &self.services,
            timeout: self.stage_timeout,
        };
        let name_stage = self.registry.build(&ctx);

        let stages: Vec<Arc<dyn Stage>> = vec![
            name_stage,
            Arc::new(ValidationStage::new(
                BasisOfRecordValidator::new(
                    self.services.basis_of_record.clone(),
                    &self.services.basis_of_record_drop_values,
                ),
                self.stage_timeout,
            )),
            Arc::new(ValidationStage::new(
                EventDateValidator::new(self.services.event_date.clone()),
                self.stage_timeout,
            )),
            Arc::new(ValidationStage::new(
                GeoreferenceValidator::new(
                    self.services.georeference.clone(),
                    self.services.georef_threshold_km,
                ),
                self.stage_timeout,
            )),
            Arc::new(SinkStage::new(Arc::clone(&sink), run_id.clone())),
        ];

        tracing::debug!(
            run_id = %run_id,
            authority = %run.authority,
            name_stage = stages[0].actor(),
            "Stage chain built"
        );
        StageChain::new(stages, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(authority: &str, target: &str) -> RunConfig {
        RunConfig {
            limit: 10,
            query: "{}".to_string(),
            authority: authority.to_string(),
            workflow: None,
            taxonomic_mode: false,
            output_target: target.to_string(),
        }
    }

    #[test]
    fn test_chain_has_fixed_topology() {
        let builder = ChainBuilder::new(&ProcessConfig::default());
        let chain = builder
            .build(&run_config("IPNI", ":memory:"), &RunId::new("r"))
            .unwrap();
        assert_eq!(chain.kinds(), StageKind::ALL.to_vec());
        assert_eq!(chain.sink().target(), ":memory:");
    }

    #[test]
    fn test_global_names_selected_case_insensitively() {
        let builder = ChainBuilder::new(&ProcessConfig::default());
        for authority in ["GLOBALNAMES", "globalnames", "GlobalNames"] {
            let chain = builder
                .build(&run_config(authority, ":memory:"), &RunId::new("r"))
                .unwrap();
            assert_eq!(chain.stages()[0].actor(), "globalnames", "{authority}");
        }
    }

    #[test]
    fn test_other_authority_selects_generic_variant_verbatim() {
        let builder = ChainBuilder::new(&ProcessConfig::default());
        let chain = builder
            .build(&run_config("Ipni", ":memory:"), &RunId::new("r"))
            .unwrap();
        assert_eq!(chain.stages()[0].actor(), "kurator.sciname:Ipni");
    }

    #[test]
    fn test_padded_authority_is_not_the_reserved_token() {
        let builder = ChainBuilder::new(&ProcessConfig::default());
        for authority in [" GLOBALNAMES", "globalnames ", "Ipni "] {
            let chain = builder
                .build(&run_config(authority, ":memory:"), &RunId::new("r"))
                .unwrap();
            assert_eq!(
                chain.stages()[0].actor(),
                format!("kurator.sciname:{authority}"),
                "{authority:?}"
            );
        }
    }

    #[test]
    fn test_unopenable_sink_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let target = dir.path().display().to_string();
        let builder = ChainBuilder::new(&ProcessConfig::default());
        let err = builder
            .build(&run_config("IPNI", &target), &RunId::new("r"))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ChainConstruction(_)));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_registry_accepts_new_authorities() {
        let mut registry = NameStageRegistry::with_defaults();
        registry.register("wfo", global_names_stage);
        let builder = ChainBuilder::new(&ProcessConfig::default()).with_registry(registry);
        let chain = builder
            .build(&run_config("WFO", ":memory:"), &RunId::new("r"))
            .unwrap();
        assert_eq!(chain.stages()[0].actor(), "globalnames");
    }

    #[test]
    fn test_empty_chain_rejected() {
        let sink: Arc<dyn SummarySink> = Arc::new(SqliteSummarySink::in_memory().unwrap());
        assert!(StageChain::new(Vec::new(), sink).is_err());
    }
}
