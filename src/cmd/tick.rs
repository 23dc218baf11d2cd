//! Run ticks from the command line: `conductor tick`.

use anyhow::Result;
use std::sync::Arc;

use conductor::config::ConductorConfig;
use conductor::dispatch::NoopContinuation;
use conductor::handler::HandlerRegistry;
use conductor::tick::TickController;

use super::open_capabilities;

/// Upper bound on in-process ticks, so a job that never converges cannot
/// spin the CLI forever.
const MAX_LOCAL_TICKS: usize = 10_000;

/// One tick with a normal HTTP continuation, or with `local` every tick
/// in-process until the job stops asking for more.
pub async fn cmd_tick(config: &ConductorConfig, job_id: &str, local: bool) -> Result<()> {
    let mut caps = open_capabilities(config)?;
    if local {
        caps = caps.with_continuation(Arc::new(NoopContinuation));
    }
    let controller = TickController::new(caps, HandlerRegistry::dry_run());

    for _ in 0..MAX_LOCAL_TICKS {
        let outcome = controller.tick(job_id).await?;
        println!("{}", serde_json::to_string(&outcome)?);
        if !local || !outcome.wants_continuation() {
            return Ok(());
        }
    }
    anyhow::bail!("job {} still running after {} ticks", job_id, MAX_LOCAL_TICKS)
}
