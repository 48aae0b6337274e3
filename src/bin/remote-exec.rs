use clap::Parser;
use remote_exec::cli::Args;
use remote_exec::config::{Environment, RunConfig};
use remote_exec::output::{Reporter, TailLimits};
use remote_exec::runner::Runner;
use remote_exec::ssh::SshConnector;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = match RunConfig::resolve(args, &Environment::capture()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let reporter = Reporter::new(std::io::stdout(), TailLimits::DEFAULT);
    let mut runner = Runner::new(SshConnector, reporter);
    let outcome = runner.run(&config).await?;

    Ok(ExitCode::from(outcome.process_exit_code()))
}
