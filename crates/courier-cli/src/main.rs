//! Submit one task to a Celery worker and wait for its answer.

use std::error::Error;

use clap::Parser;
use courier_core::{Client, ClientConfig, PartialTaskOptions};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "courier-cli")]
#[command(about = "Submit a task to a Celery worker over Redis and wait for the result", long_about = None)]
struct Args {
    /// Registered task name
    #[arg(default_value = "tasks.add")]
    task: String,

    /// Positional arguments passed to the task
    #[arg(allow_negative_numbers = true, default_values_t = vec![1, 2])]
    numbers: Vec<i64>,

    /// Target queue (defaults to COURIER_DEFAULT_QUEUE or "celery")
    #[arg(short, long)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // (A) 引数
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (B) 設定は COURIER_* 環境変数から
    let config = ClientConfig::from_env()?;
    let client = Client::connect(config).await?;

    // (C) 結果の購読 → 投入
    let mut options = PartialTaskOptions::new();
    if let Some(queue) = &args.queue {
        options = options.queue(queue.as_str());
    }
    let submission = client
        .submit_and_watch(&args.task, &args.numbers, &json!({}), &options)
        .await?;
    println!("submitted {}{:?} as {}", args.task, args.numbers, submission.task_id);

    // (D) 完了を待つ（タイムアウトなら None）
    match submission.result.wait().await? {
        Some(result) => match result.meta() {
            Some(meta) => println!("status={} result={}", meta.status, meta.result),
            None => println!("result: {result:?}"),
        },
        None => println!("no result within the wait timeout"),
    }

    // (E) キューの中身（worker が取り出していれば空）
    let queue = args.queue.as_deref().unwrap_or(client.default_queue());
    let queued = client.list_queued(Some(queue)).await?;
    println!("{} message(s) waiting in {queue}", queued.len());
    for message in queued {
        println!("  {} {}", message["headers"]["task"], message["headers"]["id"]);
    }

    Ok(())
}
