use vgen_queue::JobQueue;
use vgen_store::{JobStore, RedisJobStore};
use vgen_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with {} submission slots, {} poll slots",
        config.max_concurrent_submissions, config.max_concurrent_polls
    );
    ensure_env_present(&["REDIS_URL", "PROVIDER_API_KEY"])?;
    ensure_redis().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_redis() -> anyhow::Result<()> {
    let store = RedisJobStore::from_env()
        .await
        .map_err(|e| anyhow::anyhow!("job store unreachable: {}", e))?;
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("job store ping failed: {}", e))?;

    let queue = JobQueue::from_env()
        .await
        .map_err(|e| anyhow::anyhow!("job queue unreachable: {}", e))?;
    queue
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("job queue ping failed: {}", e))?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
