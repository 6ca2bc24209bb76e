use tracing_subscriber::EnvFilter;
use worker::{RunnerMessage, WorkerConfig, init_worker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerConfig::from_env()?;

    let Some((runner, mut handle)) = init_worker(config).await? else {
        tracing::info!("Nothing to do, exiting");
        return Ok(());
    };

    tokio::select! {
        stopped = &mut handle => stopped?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping runner after the current job");
            runner.send_message(RunnerMessage::Shutdown)?;
            handle.await?;
        }
    }

    tracing::info!("Export worker stopped");
    Ok(())
}
