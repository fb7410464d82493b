use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Portable signal names understood by every process implementation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Terminate,
    Kill,
    Interrupt,
    Hangup,
    Abort,
    User1,
    User2,
}

impl Signal {
    /// OS signal number for this signal.
    #[must_use]
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Interrupt => libc::SIGINT,
            Self::Hangup => libc::SIGHUP,
            Self::Abort => libc::SIGABRT,
            Self::User1 => libc::SIGUSR1,
            Self::User2 => libc::SIGUSR2,
        }
    }

    #[must_use]
    pub fn from_raw(raw: libc::c_int) -> Option<Self> {
        match raw {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGKILL => Some(Self::Kill),
            libc::SIGINT => Some(Self::Interrupt),
            libc::SIGHUP => Some(Self::Hangup),
            libc::SIGABRT => Some(Self::Abort),
            libc::SIGUSR1 => Some(Self::User1),
            libc::SIGUSR2 => Some(Self::User2),
            _ => None,
        }
    }

    /// Delivers the signal to a single pid.
    pub(crate) fn send_to(self, pid: i32) -> Result<()> {
        if pid <= 0 {
            return Err(Error::State(format!("cannot signal invalid pid {pid}")));
        }

        #[allow(unsafe_code)]
        unsafe {
            if libc::kill(pid, self.as_raw()) == -1 {
                return Err(std::io::Error::last_os_error().into());
            }
        }

        Ok(())
    }

    /// Delivers the signal to every member of a process group.
    pub(crate) fn send_to_group(self, pgid: i32) -> Result<()> {
        if pgid <= 0 {
            return Err(Error::State(format!("cannot signal invalid group {pgid}")));
        }

        #[allow(unsafe_code)]
        unsafe {
            if libc::killpg(pgid, self.as_raw()) == -1 {
                return Err(std::io::Error::last_os_error().into());
            }
        }

        Ok(())
    }
}

/// Whether any process is still a member of the group.
pub(crate) fn group_alive(pgid: i32) -> bool {
    if pgid <= 0 {
        return false;
    }

    #[allow(unsafe_code)]
    let res = unsafe { libc::killpg(pgid, 0) };
    res == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Terminate => "terminate",
            Self::Kill => "kill",
            Self::Interrupt => "interrupt",
            Self::Hangup => "hangup",
            Self::Abort => "abort",
            Self::User1 => "user1",
            Self::User2 => "user2",
        };
        f.write_str(name)
    }
}

impl FromStr for Signal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().trim_start_matches("sig") {
            "term" | "terminate" => Ok(Self::Terminate),
            "kill" => Ok(Self::Kill),
            "int" | "interrupt" => Ok(Self::Interrupt),
            "hup" | "hangup" => Ok(Self::Hangup),
            "abrt" | "abort" => Ok(Self::Abort),
            "usr1" | "user1" => Ok(Self::User1),
            "usr2" | "user2" => Ok(Self::User2),
            _ => Err(Error::Validation(format!("unknown signal `{s}`"))),
        }
    }
}
