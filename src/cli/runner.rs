//! Runs the parsed command against the transfer pipelines

use crate::cli::args::{Args, Command};
use crate::config::Config;
use crate::error::Result;
use crate::logging::Logger;
use crate::oci::Descriptor;
use crate::transfer::{pull_package, push_package, with_cancellation};

pub struct Runner {
    args: Args,
    config: Config,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let config = args.to_config();
        let logger = config.logger();
        Self {
            args,
            config,
            logger,
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Run the command until it finishes or Ctrl-C arrives
    pub async fn run(&self) -> Result<Descriptor> {
        if let Some(path) = &self.config.credentials_path {
            self.logger
                .debug(&format!("Credentials file: {}", path.display()));
        }
        with_cancellation(self.execute(), shutdown_signal()).await
    }

    async fn execute(&self) -> Result<Descriptor> {
        match &self.args.command {
            Command::Pull { reference, destdir } => pull_package(&self.config, reference, destdir).await,
            Command::Push { sourcedir, reference } => {
                push_package(&self.config, sourcedir, reference).await
            }
        }
    }
}

/// Completes on Ctrl-C; never completes if the handler cannot be installed
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
