//! Generate a small deck end to end.
//!
//! ```sh
//! OPENAI_API_KEY=sk-... cargo run -p deckflow --example pipeline -- "Rust ownership" 5 [settings.toml]
//! ```
//!
//! Set `DECKFLOW_PROVIDER=deepseek` (with `DEEPSEEK_API_KEY`) to use DeepSeek instead.

use anyhow::Context;
use deckflow::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let topic = args.next().unwrap_or_else(|| "Rust ownership".to_string());
    let units: usize = args.next().map(|n| n.parse()).transpose()?.unwrap_or(5);
    let settings_path = args.next().map(PathBuf::from);

    let settings = Settings::load(settings_path.as_deref())?;
    init_tracing(&settings.logging)?;

    let (provider, key_var) = match std::env::var("DECKFLOW_PROVIDER").as_deref() {
        Ok("deepseek") => (ProviderSpec::new(ProviderKind::DeepSeek, "deepseek-chat"), "DEEPSEEK_API_KEY"),
        _ => (ProviderSpec::openai("gpt-4o-mini"), "OPENAI_API_KEY"),
    };
    let key = std::env::var(key_var).with_context(|| format!("{} is not set", key_var))?;
    let keys = StaticKeyResolver::new().with_key("demo", key);

    let engine = Engine::builder(settings, Arc::new(keys)).build()?;
    engine.start();

    let spec = JobSpec::new(topic, units, provider)
        .with_audience("engineers new to the topic")
        .with_identity("demo");
    let id = engine.submit_job(spec, 0)?;
    println!("submitted job {}", id);

    let mut last = usize::MAX;
    let snapshot = loop {
        let snapshot = engine.get_job_status(&id)?;
        if snapshot.progress.completed != last {
            last = snapshot.progress.completed;
            println!(
                "[{}] {}/{} units",
                snapshot.status.as_str(),
                snapshot.progress.completed,
                snapshot.progress.total
            );
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    match snapshot.status {
        JobStatus::Completed => {
            let plan = engine.job_plan(&id)?;
            println!("\n{}", serde_json::to_string_pretty(&plan)?);
        }
        _ => {
            let reason = snapshot
                .error
                .or(snapshot.cancel_reason)
                .unwrap_or_else(|| "unknown".to_string());
            println!("job ended as {}: {}", snapshot.status.as_str(), reason);
        }
    }

    println!("\n{}", serde_json::to_string_pretty(&engine.metrics())?);
    engine.shutdown().await;
    Ok(())
}
