//! Producer/consumer example
//!
//! This example demonstrates how to:
//! 1. Start a broker in-process
//! 2. Produce JSON-encoded jobs into a queue
//! 3. Consume and acknowledge them
//! 4. Let a lease expire and watch the job come back
//!
//! To run this example:
//! cargo run --example producer_consumer

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use task_broker::{Broker, BrokerServer, FileSnapshotStore, TaskClient};
use tracing::{info, warn, Level};

const QUEUE: &str = "resize";

/// Image resize job carried as the task payload
#[derive(Debug, Serialize, Deserialize)]
struct ResizeJob {
    image: String,
    width: u32,
    height: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let prefix = std::env::temp_dir().join("task_broker_demo");
    let broker = Broker::new(
        Duration::from_secs(1),
        Arc::new(FileSnapshotStore::new(prefix.to_string_lossy())),
    );
    let server = BrokerServer::bind("127.0.0.1:0".parse()?, broker).await?;
    let client = TaskClient::new(server.local_addr()?);
    tokio::spawn(server.run());

    for (image, width) in [("cat.png", 640), ("dog.png", 800), ("owl.png", 1024)] {
        let job = ResizeJob {
            image: image.to_string(),
            width,
            height: width * 3 / 4,
        };
        let id = client.add(QUEUE, &serde_json::to_vec(&job)?).await?;
        info!("Produced job {} for {}", id, job.image);
    }

    // The first consumer crashes without acknowledging.
    if let Some(task) = client.get(QUEUE).await? {
        warn!("Consumer dropped task {} without acknowledging it", task.id);
    }

    while let Some(task) = client.get(QUEUE).await? {
        let job: ResizeJob = serde_json::from_slice(&task.payload)?;
        info!(
            "Resizing {} to {}x{} (task {})",
            job.image, job.width, job.height, task.id
        );
        client.ack(QUEUE, task.id).await?;
    }

    info!("Queue drained, waiting for the abandoned lease to expire");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    match client.get(QUEUE).await? {
        Some(task) => {
            let job: ResizeJob = serde_json::from_slice(&task.payload)?;
            info!("Redelivered task {} ({})", task.id, job.image);
            client.ack(QUEUE, task.id).await?;
        }
        None => warn!("Expected the abandoned task to be redelivered"),
    }

    info!("Task 0 still known: {}", client.contains(QUEUE, 0).await?);
    Ok(())
}
