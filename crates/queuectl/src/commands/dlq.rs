use super::{load_config, open_queue, print_jobs};
use anyhow::Result;
use clap::Subcommand;
use console::style;

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// List dead jobs as JSON lines
    List,

    /// Move a dead job back to pending with its attempts reset
    Retry {
        /// Job id
        id: String,
    },
}

pub async fn dlq(cmd: DlqCommand) -> Result<()> {
    let config = load_config()?;
    let queue = open_queue(&config).await?;

    match cmd {
        DlqCommand::List => print_jobs(&queue.dlq().await?),
        DlqCommand::Retry { id } => {
            queue.retry_dead(&id).await?;
            println!("Requeued {}", style(id).cyan());
            Ok(())
        }
    }
}
