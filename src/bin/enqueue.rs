//! Push a task onto a worker queue, optionally waiting for its result
//!
//! ```text
//! taskforge-enqueue --project demo "Create a hello world page"
//! taskforge-enqueue --project demo --agent-type debug --wait 300 "Fix the build"
//! ```

use std::time::{Duration, Instant};

use clap::Parser;
use serde_json::{Map, Value};

use taskforge::broker::{self, queue_key, result_key};
use taskforge::{AgentType, Config, Task, TaskResult};

#[derive(Parser)]
#[command(name = "taskforge-enqueue")]
#[command(about = "Submit a build request to a taskforge worker", long_about = None)]
struct Cli {
    /// Project whose workspace the task runs in
    #[arg(long)]
    project: String,

    #[arg(long, default_value = "cli")]
    user: String,

    /// code, design or debug
    #[arg(long, default_value = "code")]
    agent_type: AgentType,

    /// Extra context as a JSON object
    #[arg(long)]
    context: Option<String>,

    /// Broker URL; defaults to the configured `broker.url`
    #[arg(long, env = "TASKFORGE_BROKER_URL")]
    broker_url: Option<String>,

    /// Wait up to this many seconds for the task result
    #[arg(long)]
    wait: Option<u64>,

    /// The natural-language request
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let broker_url = match cli.broker_url {
        Some(url) => url,
        None => Config::load_with_dotenv()?.broker.url,
    };

    let mut task = Task::new(&cli.project, &cli.user, &cli.prompt, cli.agent_type);
    if let Some(raw) = &cli.context {
        let context: Map<String, Value> = serde_json::from_str(raw)
            .map_err(|e| format!("--context must be a JSON object: {}", e))?;
        task = task.with_context(context);
    }

    let broker = broker::connect(&broker_url).await?;
    let queue = queue_key(task.agent_type);
    broker.push(&queue, &serde_json::to_string(&task)?).await?;
    println!("Enqueued {} on {}", task.task_id, queue);

    let Some(wait_secs) = cli.wait else {
        return Ok(());
    };

    let deadline = Instant::now() + Duration::from_secs(wait_secs);
    let key = result_key(&task.task_id);
    while Instant::now() < deadline {
        if let Some(raw) = broker.get(&key).await? {
            let result: TaskResult = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.completed {
                return Ok(());
            }
            return Err(result
                .error
                .unwrap_or_else(|| "task did not complete".to_string())
                .into());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(format!("no result for {} after {}s", task.task_id, wait_secs).into())
}
