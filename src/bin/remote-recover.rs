use remote_exec::config::Environment;
use remote_exec::output::{Reporter, TailLimits};
use remote_exec::recovery::{recover, RecoveryConfig};
use remote_exec::runner::Runner;
use remote_exec::ssh::SshConnector;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = match RecoveryConfig::from_env(&Environment::capture()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let reporter = Reporter::new(std::io::stdout(), TailLimits::RECOVERY).compact();
    let mut runner = Runner::new(SshConnector, reporter);
    recover(&mut runner, &config).await?;
    Ok(ExitCode::SUCCESS)
}
