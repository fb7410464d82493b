use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tokio::signal;
use warden_config::{load_from_path, DEFAULT_FILENAMES};
use warden_core::{CancellationToken, CreateOptions, Sink};

use crate::{
    commands::{display_name, print_json},
    logger::{Logger, PrefixedSink},
};

pub async fn run(file: Option<String>, parallel: bool, json: bool) -> Result<()> {
    let file = file.unwrap_or_else(|| {
        for filename in DEFAULT_FILENAMES {
            if std::path::Path::new(filename).exists() {
                return filename.to_string();
            }
        }
        DEFAULT_FILENAMES[0].to_string()
    });

    let path = PathBuf::from(&file);
    let config = load_from_path(&path).with_context(|| format!("failed to load {file}"))?;
    let manager = config.manager.builder().build()?;

    let mut command = config
        .command
        .command(manager.clone())
        .prehook(|opts: &mut CreateOptions| {
            let sink: Sink = Arc::new(PrefixedSink::new(
                display_name(&opts.args),
                Logger::stdout(),
            ));
            opts.output.output = Some(sink.clone());
            opts.output.error = Some(sink);
        });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C: canceling command");
            ctrl_c.cancel();
        }
    });

    let res = if parallel || config.command.parallel {
        command.run_parallel(&cancel).await
    } else {
        command.run(&cancel).await
    };

    let mut logger = Logger::stdout();
    match &res {
        Ok(()) => logger.system(&format!("{} process(es) finished", command.procs().len())),
        Err(err) => logger.system(&format!("command failed: {err}")),
    }

    if json {
        print_json(command.procs()).await?;
    }

    manager.close(&CancellationToken::new()).await?;
    res.map_err(Into::into)
}
