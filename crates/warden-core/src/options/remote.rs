use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Target host for a process that runs over ssh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteOptions {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Extra flags handed to the ssh client.
    pub args: Vec<String>,
}

impl RemoteOptions {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Validation("remote host must not be empty".to_owned()));
        }
        if self.port == Some(0) {
            return Err(Error::Validation("remote port must not be zero".to_owned()));
        }
        Ok(())
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Wraps a local argv into an ssh invocation running it on the host.
    #[must_use]
    pub fn wrap(&self, args: &[String]) -> Vec<String> {
        let mut argv = vec!["ssh".to_owned()];
        argv.extend(self.args.iter().cloned());
        if let Some(port) = self.port {
            argv.push("-p".to_owned());
            argv.push(port.to_string());
        }
        argv.push(self.destination());
        argv.push(shell_words::join(args));
        argv
    }
}
