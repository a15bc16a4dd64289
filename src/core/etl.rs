use crate::domain::ports::{Pipeline, RunOutcome};
use crate::utils::error::Result;
use std::time::Instant;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    /// Extract, transform, load; the first stage error ends the run.
    pub async fn run(&self) -> Result<RunOutcome> {
        let name = self.pipeline.name();
        let started = Instant::now();
        tracing::info!("[{}] run started", name);

        let extracted = self.pipeline.extract().await?;
        tracing::debug!("[{}] extract done after {:?}", name, started.elapsed());
        let transformed = self.pipeline.transform(extracted).await?;
        tracing::debug!("[{}] transform done after {:?}", name, started.elapsed());
        let outcome = self.pipeline.load(transformed).await?;

        tracing::info!(
            "[{}] run finished in {:?}: {} rows, {} artifact(s), delivered: {}",
            name,
            started.elapsed(),
            outcome.rows_considered,
            outcome.artifacts.len(),
            outcome.delivered
        );
        Ok(outcome)
    }
}
