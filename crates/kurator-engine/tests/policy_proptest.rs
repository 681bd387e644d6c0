use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kurator_engine::chain::{ChainBuilder, StageChain, GLOBAL_NAMES_AUTHORITY};
use kurator_engine::config::{ProcessConfig, RunConfig};
use kurator_engine::result::Disposition;
use kurator_engine::run::{PipelineRun, RunPolicy};
use kurator_engine::source::VecSource;
use kurator_engine::stage::{SinkStage, Stage, ValidationStage, Validator, Verdict};
use kurator_sink::{SqliteSummarySink, SummarySink};
use kurator_types::{Record, RunId, RunStatus, StageError, StageKind};
use proptest::prelude::*;

fn run_config(authority: &str, limit: u64) -> RunConfig {
    RunConfig {
        limit,
        query: "{}".into(),
        authority: authority.to_string(),
        workflow: None,
        taxonomic_mode: false,
        output_target: ":memory:".into(),
    }
}

/// Decides from the record's `script.<stage>` field: `pass`, `reject`, or `drop`.
struct Scripted(StageKind);

#[async_trait]
impl Validator for Scripted {
    fn kind(&self) -> StageKind {
        self.0
    }
    fn service(&self) -> &str {
        "test.scripted"
    }
    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
        let key = format!("script.{}", self.0);
        Ok(match record.field(&key) {
            Some("reject") => Verdict::Reject("scripted reject".into()),
            Some("drop") => Verdict::Discard("scripted drop".into()),
            _ => Verdict::Pass("scripted pass".into()),
        })
    }
}

const SCRIPTED_STAGES: [StageKind; 3] = [
    StageKind::ScientificName,
    StageKind::BasisOfRecord,
    StageKind::EventDate,
];

fn action() -> impl Strategy<Value = &'static str> {
    prop_oneof![6 => Just("pass"), 2 => Just("reject"), 1 => Just("drop")]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reserved_token_selects_global_names_in_any_case(
        mask in proptest::collection::vec(any::<bool>(), GLOBAL_NAMES_AUTHORITY.len())
    ) {
        let authority: String = GLOBAL_NAMES_AUTHORITY
            .chars()
            .zip(mask)
            .map(|(c, lower)| if lower { c.to_ascii_lowercase() } else { c })
            .collect();
        let builder = ChainBuilder::new(&ProcessConfig::default());
        let chain = builder
            .build(&run_config(&authority, 1), &RunId::new("p"))
            .expect("in-memory chain must build");
        prop_assert_eq!(chain.stages()[0].actor(), "globalnames");
    }

    #[test]
    fn other_authorities_select_generic_variant_verbatim(authority in "[A-Za-z][A-Za-z0-9_.-]{0,15}") {
        prop_assume!(!authority.eq_ignore_ascii_case(GLOBAL_NAMES_AUTHORITY));
        let builder = ChainBuilder::new(&ProcessConfig::default());
        let chain = builder
            .build(&run_config(&authority, 1), &RunId::new("p"))
            .expect("in-memory chain must build");
        let expected = format!("kurator.sciname:{authority}");
        prop_assert_eq!(chain.stages()[0].actor(), expected.as_str());
        // Selection is a pure function of the authority.
        let again = builder
            .build(&run_config(&authority, 1), &RunId::new("q"))
            .expect("in-memory chain must build");
        prop_assert_eq!(again.stages()[0].actor(), chain.stages()[0].actor());
    }

    #[test]
    fn every_admitted_record_terminates_exactly_once(
        scripts in proptest::collection::vec(proptest::collection::vec(action(), 3), 0..40),
        depth in 1_usize..6,
    ) {
        let sink = Arc::new(SqliteSummarySink::in_memory().unwrap());
        let dyn_sink: Arc<dyn SummarySink> = sink.clone();
        let mut stages: Vec<Arc<dyn Stage>> = SCRIPTED_STAGES
            .iter()
            .map(|kind| {
                Arc::new(ValidationStage::new(Scripted(*kind), Duration::from_secs(5)))
                    as Arc<dyn Stage>
            })
            .collect();
        stages.push(Arc::new(SinkStage::new(Arc::clone(&dyn_sink), RunId::new("prop"))));
        let chain = StageChain::new(stages, dyn_sink).unwrap();

        let records: Vec<Record> = scripts
            .iter()
            .enumerate()
            .map(|(i, script)| {
                SCRIPTED_STAGES
                    .iter()
                    .zip(script)
                    .fold(Record::new(format!("r{i}")), |record, (kind, act)| {
                        record.with_field(format!("script.{kind}"), *act)
                    })
            })
            .collect();
        let admitted = records.len() as u64;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let summary = runtime.block_on(async {
            let mut run = PipelineRun::new(
                RunId::new("prop"),
                Arc::new(run_config("IPNI", 1_000)),
                chain,
                Box::new(VecSource::new(records)),
                RunPolicy::new(depth),
            );
            run.start().await.unwrap();
            run.await_completion().await.unwrap()
        });

        prop_assert_eq!(summary.status, RunStatus::Completed);
        prop_assert_eq!(summary.stats.admitted, admitted);
        prop_assert_eq!(
            summary.stats.passed + summary.stats.dropped + summary.stats.failed,
            admitted
        );
        prop_assert_eq!(sink.count_outcomes().unwrap(), summary.stats.passed);
        prop_assert!(summary.peak_in_flight <= (depth + SCRIPTED_STAGES.len() + 1) as u64);

        for trail in &summary.trails {
            let index: usize = trail.record_id.as_str()[1..].parse().unwrap();
            let script = &scripts[index];
            let stopped_at = script.iter().position(|a| *a != "pass").unwrap();
            prop_assert_eq!(trail.provenance.len(), stopped_at + 1);
            let expected = if script[stopped_at] == "drop" {
                Disposition::Dropped
            } else {
                Disposition::Failed
            };
            prop_assert_eq!(trail.disposition, expected);
        }
    }
}
