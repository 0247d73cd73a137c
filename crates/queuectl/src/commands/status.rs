use super::{load_config, open_queue};
use anyhow::Result;
use console::style;
use queuectl_jobs::JobState;

pub async fn status() -> Result<()> {
    let config = load_config()?;
    let stats = open_queue(&config).await?.stats().await?;

    println!("{}", style("Jobs").bold());
    for state in JobState::ALL {
        let count = stats.get(&state).copied().unwrap_or(0);
        println!("  {:<12}{}", state.as_str(), count);
    }
    Ok(())
}
