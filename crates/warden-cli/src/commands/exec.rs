use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::signal;
use warden_core::{CancellationToken, CreateOptions, ManagerBuilder, Signal, Sink};

use crate::{
    commands::{display_name, print_json},
    logger::{Logger, PrefixedSink},
};

pub async fn exec(args: Vec<String>, timeout: Option<u64>, tags: Vec<String>, json: bool) -> Result<()> {
    let manager = ManagerBuilder::new().build()?;

    let sink: Sink = Arc::new(PrefixedSink::new(display_name(&args), Logger::stdout()));
    let mut opts = CreateOptions::new(args);
    opts.timeout = timeout.map(Duration::from_secs);
    opts.tags = tags;
    opts.output.output = Some(sink.clone());
    opts.output.error = Some(sink.clone());

    let process = manager.create_process(opts).await?;
    tracing::debug!(id = %process.id(), "process started");

    let forward = process.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C: terminating process");
            if let Err(err) = forward.signal(Signal::Terminate).await {
                tracing::warn!("failed to terminate process: {err}");
            }
        }
    });

    let res = process.wait(&CancellationToken::new()).await;
    sink.close()?;

    if json {
        print_json(&[process]).await?;
    }

    manager.close(&CancellationToken::new()).await?;
    res.map(|_| ()).map_err(Into::into)
}
