use std::sync::Arc;

use anyhow::Result;
use warden_core::{Process, ProcessInfo};

pub mod exec;
pub mod run;

/// Prints the final info of every process as a JSON array.
pub async fn print_json(processes: &[Arc<dyn Process>]) -> Result<()> {
    let mut infos: Vec<ProcessInfo> = Vec::with_capacity(processes.len());
    for process in processes {
        infos.push(process.info().await);
    }
    println!("{}", serde_json::to_string_pretty(&infos)?);
    Ok(())
}

/// Prefix used for a process' output lines.
pub fn display_name(args: &[String]) -> String {
    args.first()
        .map(|program| {
            std::path::Path::new(program)
                .file_name()
                .map_or_else(|| program.clone(), |name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "process".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(&["/usr/bin/env".to_owned()]), "env");
        assert_eq!(display_name(&["echo".to_owned(), "hi".to_owned()]), "echo");
        assert_eq!(display_name(&[]), "process");
    }
}
