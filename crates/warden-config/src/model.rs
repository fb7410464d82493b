use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use warden_core::{
    Command, Manager, ManagerBuilder, ProcessGroupTracker, ProcessImplementation, RemoteOptions,
};

use crate::{
    raw::{RawCommand, RawConfig, RawImplementation, RawManager},
    ConfigError,
};

#[derive(Debug, PartialEq)]
pub struct Config {
    pub version: u32,
    pub manager: ManagerConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Default, PartialEq)]
pub struct ManagerConfig {
    pub max_procs: Option<usize>,
    pub synchronized: bool,
    pub track_groups: bool,
    pub environment: HashMap<String, String>,
    pub remote: Option<RemoteOptions>,
}

#[derive(Debug, PartialEq)]
pub struct CommandConfig {
    pub cmds: Vec<Vec<String>>,
    pub parallel: bool,
    pub continue_on_error: bool,
    pub ignore_error: bool,
    pub background: bool,
    pub directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
    pub sudo: bool,
    pub sudo_user: Option<String>,
    pub tags: Vec<String>,
    pub timeout: Option<Duration>,
    pub implementation: ProcessImplementation,
}

impl ManagerConfig {
    /// Builder for a manager shaped by this section.
    #[must_use]
    pub fn builder(&self) -> ManagerBuilder {
        let mut builder = ManagerBuilder::new()
            .synchronized(self.synchronized)
            .environment(self.environment.clone());
        if let Some(max_procs) = self.max_procs {
            builder = builder.max_procs(max_procs);
        }
        if self.track_groups {
            builder = builder.tracker(Arc::new(ProcessGroupTracker::new()));
        }
        if let Some(remote) = &self.remote {
            builder = builder.remote(remote.clone());
        }
        builder
    }
}

impl CommandConfig {
    /// A command running this section's command lines through `manager`.
    #[must_use]
    pub fn command(&self, manager: Arc<dyn Manager>) -> Command {
        let mut command = Command::with_manager(manager)
            .extend(self.cmds.clone())
            .continue_on_error(self.continue_on_error)
            .ignore_error(self.ignore_error)
            .background(self.background)
            .environment(self.environment.clone())
            .implementation(self.implementation)
            .sudo(self.sudo);

        if let Some(user) = &self.sudo_user {
            command = command.sudo_as(user.clone());
        }
        if let Some(dir) = &self.directory {
            command = command.directory(dir.clone());
        }
        if let Some(timeout) = self.timeout {
            command = command.timeout(timeout);
        }
        for tag in &self.tags {
            command = command.tag(tag);
        }
        command
    }
}

fn validate_manager(raw: RawManager, errors: &mut Vec<String>) -> ManagerConfig {
    if raw.max_procs == Some(0) {
        errors.push("manager: max_procs must be greater than zero".to_owned());
    }

    let remote = raw.remote.map(|raw_remote| RemoteOptions {
        host: raw_remote.host,
        user: raw_remote.user,
        port: raw_remote.port,
        args: Vec::new(),
    });
    if let Some(Err(err)) = remote.as_ref().map(RemoteOptions::validate) {
        errors.push(format!("manager: {err}"));
    }

    ManagerConfig {
        max_procs: raw.max_procs,
        synchronized: raw.synchronized.unwrap_or_default(),
        track_groups: raw.track_groups.unwrap_or_default(),
        environment: raw.environment.unwrap_or_default(),
        remote,
    }
}

fn validate_command(raw: RawCommand, errors: &mut Vec<String>) -> CommandConfig {
    if raw.cmds.is_empty() {
        errors.push("command: cmds is empty".to_owned());
    }
    for (idx, cmd) in raw.cmds.iter().enumerate() {
        match cmd.first() {
            None => errors.push(format!("command: cmds[{idx}] is empty")),
            Some(program) if program.trim().is_empty() => {
                errors.push(format!("command: cmds[{idx}] has no program"));
            }
            Some(_) => {}
        }
    }
    if raw.timeout_secs == Some(0) {
        errors.push("command: timeout_secs must be greater than zero".to_owned());
    }
    if raw.sudo_user.as_ref().is_some_and(|u| u.trim().is_empty()) {
        errors.push("command: sudo_user must not be empty".to_owned());
    }

    let implementation = match raw.implementation {
        Some(RawImplementation::Blocking) => ProcessImplementation::Blocking,
        Some(RawImplementation::Basic) | None => ProcessImplementation::Basic,
    };

    CommandConfig {
        cmds: raw.cmds,
        parallel: raw.parallel.unwrap_or_default(),
        continue_on_error: raw.continue_on_error.unwrap_or_default(),
        ignore_error: raw.ignore_error.unwrap_or_default(),
        background: raw.background.unwrap_or_default(),
        directory: raw.directory.map(PathBuf::from),
        environment: raw.environment.unwrap_or_default(),
        sudo: raw.sudo.unwrap_or_default(),
        sudo_user: raw.sudo_user,
        tags: raw.tags.unwrap_or_default(),
        timeout: raw.timeout_secs.map(Duration::from_secs),
        implementation,
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let mut errors = Vec::new();
        if raw.version != 1 {
            errors.push(format!("unsupported config version {}", raw.version));
        }
        let manager = validate_manager(raw.manager, &mut errors);
        let command = validate_command(raw.command, &mut errors);

        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        Ok(Config {
            version: raw.version,
            manager,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_command(cmds: Vec<Vec<String>>) -> RawCommand {
        RawCommand {
            cmds,
            parallel: None,
            continue_on_error: None,
            ignore_error: None,
            background: None,
            directory: None,
            environment: None,
            sudo: None,
            sudo_user: None,
            tags: None,
            timeout_secs: None,
            implementation: None,
        }
    }

    #[test]
    fn test_raw_to_config_defaults() {
        let raw = RawConfig {
            version: 1,
            manager: RawManager::default(),
            command: raw_command(vec![vec!["echo".to_owned(), "hi".to_owned()]]),
        };

        let config = Config::try_from(raw).unwrap();
        assert_eq!(config.manager, ManagerConfig::default());
        assert_eq!(config.command.cmds, vec![vec!["echo", "hi"]]);
        assert!(!config.command.parallel);
        assert_eq!(config.command.timeout, None);
        assert_eq!(config.command.implementation, ProcessImplementation::Basic);
    }

    #[test]
    fn test_errors_are_collected() {
        let raw = RawConfig {
            version: 2,
            manager: RawManager {
                max_procs: Some(0),
                ..Default::default()
            },
            command: RawCommand {
                timeout_secs: Some(0),
                ..raw_command(vec![vec![], vec![" ".to_owned()]])
            },
        };

        let Err(ConfigError::Validation(message)) = Config::try_from(raw) else {
            panic!("expected a validation error");
        };
        assert_eq!(message.matches("; ").count(), 4);
        assert!(message.contains("cmds[0] is empty"));
        assert!(message.contains("cmds[1] has no program"));
    }

    #[test]
    fn test_manager_builder_builds() {
        let config = ManagerConfig {
            max_procs: Some(2),
            synchronized: true,
            track_groups: true,
            ..Default::default()
        };
        assert!(config.builder().build().is_ok());
    }
}
