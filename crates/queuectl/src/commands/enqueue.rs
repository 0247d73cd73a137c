use super::{load_config, open_queue};
use anyhow::{bail, Context, Result};
use console::style;
use queuectl_jobs::{EnqueueRequest, Enqueued};

pub async fn enqueue(job_json: &str) -> Result<()> {
    let request: EnqueueRequest =
        serde_json::from_str(job_json).context("job must be a JSON object with a \"command\"")?;

    let config = load_config()?;
    let queue = open_queue(&config).await?;

    match queue.enqueue(request).await? {
        Enqueued::Inserted(id) => {
            println!("Enqueued {}", style(id).cyan());
            Ok(())
        }
        Enqueued::Duplicate(id) => bail!("job '{id}' already exists"),
    }
}
