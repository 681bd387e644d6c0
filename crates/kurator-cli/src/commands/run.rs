use anyhow::Result;
use kurator_engine::{PipelineError, ProcessConfig, RunDispatcher, RunRequest, RunSummary};

/// Execute the `run` command: dispatch one run and print its summary.
pub async fn execute(process: ProcessConfig, request: &RunRequest) -> Result<()> {
    let dispatcher = RunDispatcher::new(process);
    match dispatcher.dispatch(request).await {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(PipelineError::RunFailed(summary)) => {
            print_summary(&summary);
            anyhow::bail!("Run {} failed: {}", summary.run_id, summary.failure_message())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Run {} {}.", summary.run_id, summary.status);
    println!("  Records admitted: {}", summary.stats.admitted);
    println!("  Passed:           {}", summary.stats.passed);
    println!("  Dropped:          {}", summary.stats.dropped);
    println!("  Failed:           {}", summary.stats.failed);
    if summary.stats.stage_errors > 0 || summary.stats.sink_errors > 0 {
        println!("    Stage errors:   {}", summary.stats.stage_errors);
        println!("    Sink errors:    {}", summary.stats.sink_errors);
    }
    println!("  Peak in flight:   {}", summary.peak_in_flight);
    println!("  runtime: {}ms", summary.elapsed_ms());
    for trail in &summary.trails {
        if let Some(last) = trail.provenance.last() {
            println!(
                "  {:?} {} at {}: {}",
                trail.disposition, trail.record_id, last.stage, last.assertion
            );
        }
    }
}
