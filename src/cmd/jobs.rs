//! Job administration commands: `create`, `status`, `fail`, `stalled`.

use anyhow::Result;
use std::time::Duration;

use conductor::config::ConductorConfig;
use conductor::store::JobRecord;

use super::open_capabilities;

pub async fn cmd_create(config: &ConductorConfig, max_units: u32, seeds: Vec<String>) -> Result<()> {
    let caps = open_capabilities(config)?;
    let job = caps.jobs().create_job(max_units, seeds).await?;
    println!("{}", job.id);
    Ok(())
}

pub async fn cmd_status(config: &ConductorConfig, job_id: Option<&str>, json: bool) -> Result<()> {
    let caps = open_capabilities(config)?;

    if let Some(id) = job_id {
        let job = caps.jobs().get(id).await?;
        let counts = caps.frontier().counts(id).await?;
        if json {
            let mut value = serde_json::to_value(&job)?;
            value["frontier"] = serde_json::to_value(counts)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!();
            println!("Job:        {}", job.id);
            println!("Status:     {}", job.status);
            println!("Phase:      {}", job.phase);
            println!("Seeding:    {}", job.seeding.as_str());
            println!("Collected:  {}/{}", counts.units_collected, job.max_units);
            println!(
                "Frontier:   {} pending, {} in progress, {} done",
                counts.pending, counts.in_progress, counts.done
            );
            println!("Heartbeat:  {}", job.phase_heartbeat_at.to_rfc3339());
            if let Some(error) = &job.error {
                println!("Error:      {}", error);
            }
            println!();
        }
        return Ok(());
    }

    let jobs = caps.jobs().list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        print_table(&jobs);
    }
    Ok(())
}

fn print_table(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    println!(
        "{:<36}  {:<10} {:<11} {:>9}  Created",
        "Job", "Status", "Phase", "Max units"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<10} {:<11} {:>9}  {}",
            job.id,
            job.status.to_string(),
            job.phase.to_string(),
            job.max_units,
            job.created_at.to_rfc3339()
        );
    }
}

pub async fn cmd_fail(config: &ConductorConfig, job_id: &str, reason: &str) -> Result<()> {
    let caps = open_capabilities(config)?;
    // Surface a clear not-found before the conditional update.
    caps.jobs().get(job_id).await?;
    if caps.jobs().mark_failed(job_id, reason).await? {
        println!("Job {} marked failed", job_id);
    } else {
        println!("Job {} is already finished; nothing changed", job_id);
    }
    Ok(())
}

pub async fn cmd_stalled(config: &ConductorConfig, older_than_secs: u64, redispatch: bool) -> Result<()> {
    let caps = open_capabilities(config)?;
    let stalled = caps
        .jobs()
        .list_stalled(Duration::from_secs(older_than_secs))
        .await?;

    if stalled.is_empty() {
        println!("No stalled jobs.");
        return Ok(());
    }
    for job in &stalled {
        println!(
            "{}  {:<11} last heartbeat {}",
            job.id,
            job.phase.to_string(),
            job.phase_heartbeat_at.to_rfc3339()
        );
    }
    if redispatch {
        let mut accepted = 0;
        for job in &stalled {
            if caps.continuation.schedule(&job.id).await {
                accepted += 1;
            }
        }
        println!("Re-dispatched {}/{} stalled job(s)", accepted, stalled.len());
    }
    Ok(())
}
