use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use grader::config::GraderConfig;
use grader::engine::PythonBackend;
use grader::jobs::WorkerJob;
use grader::redis_manager::RedisManager;
use grader::{store, Grader};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = GraderConfig::from_env().context("Failed to load grader configuration")?;
    info!(
        "Starting Grader Worker (python={}, timeout={}s..{}s, memory={}MB)",
        config.python_bin, config.default_timeout_secs, config.max_timeout_secs, config.memory_limit_mb
    );

    let exercise_store = store::from_spec(&config.exercise_store)
        .await
        .with_context(|| format!("Failed to open exercise store {}", config.exercise_store))?;
    info!("Exercise store: {}", config.exercise_store);

    let mut redis = RedisManager::connect(&config.redis_url).await?;
    let backend = Arc::new(PythonBackend::from_config(&config));
    let grader = Grader::new(config, exercise_store, backend);

    info!("Worker {} waiting for jobs...", redis.worker_id());

    loop {
        let job = redis.pop_job().await?;
        let request_id = job.request_id().to_string();

        let stored = match job {
            WorkerJob::Grade(request) => {
                info!(
                    "Received grade job: request_id={}, exercise_id={}",
                    request.request_id, request.exercise_id
                );
                let response = grader.grade(&request).await;
                info!(
                    "Grade job completed: request_id={}, passed={}",
                    response.request_id, response.passed
                );
                redis.store_result(&request_id, &response).await
            }
            WorkerJob::Run(request) => {
                info!("Received run job: request_id={}", request.request_id);
                let response = grader.run_code(&request).await;
                info!(
                    "Run job completed: request_id={}, error={}",
                    response.request_id,
                    response.error.is_some()
                );
                redis.store_result(&request_id, &response).await
            }
        };

        if let Err(e) = stored {
            error!("Failed to store result for {}: {:#}", request_id, e);
        }
    }
}
