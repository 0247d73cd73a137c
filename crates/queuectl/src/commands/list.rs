use super::{load_config, open_queue, print_jobs};
use anyhow::Result;
use clap::Args;
use queuectl_jobs::JobState;

/// Arguments for the `list` command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only jobs in this state (pending, processing, completed, dead)
    #[arg(short, long)]
    pub state: Option<JobState>,
}

pub async fn list(args: ListArgs) -> Result<()> {
    let config = load_config()?;
    let jobs = open_queue(&config).await?.list(args.state).await?;
    print_jobs(&jobs)
}
