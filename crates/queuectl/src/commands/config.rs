use anyhow::Result;
use clap::Subcommand;
use console::style;
use queuectl_jobs::config::{set_value, QueueConfig};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Persist a setting to the config file
    Set {
        /// db_path, backoff_base, default_max_retries, worker_poll_interval, pid_file or worker_log
        key: String,
        value: String,
    },

    /// Print the effective configuration as JSON
    Show,
}

pub fn config(cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Set { key, value } => {
            let path = QueueConfig::config_path();
            set_value(&path, &key, &value)?;
            println!(
                "Set {} = {} in {}",
                style(&key).bold(),
                style(&value).cyan(),
                path.display()
            );
        }
        ConfigCommand::Show => {
            let config = super::load_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
