use std::{os::unix::fs::PermissionsExt, path::PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Content to write to a file on the manager's host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteFileOptions {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub append: bool,
    /// Unix mode bits applied after writing.
    pub permissions: Option<u32>,
    /// Allow writing an empty file.
    pub allow_empty: bool,
}

impl WriteFileOptions {
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Validation("write file requires a path".to_owned()));
        }
        if self.content.is_empty() && !self.allow_empty {
            return Err(Error::Validation(format!(
                "refusing to write empty content to {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    pub async fn write(&self) -> Result<()> {
        self.validate()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .await?;
        file.write_all(&self.content).await?;
        file.flush().await?;

        if let Some(mode) = self.permissions {
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode)).await?;
        }

        tracing::debug!(path = %self.path.display(), bytes = self.content.len(), "wrote file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");

        let mut opts = WriteFileOptions {
            path: path.clone(),
            content: b"one\n".to_vec(),
            permissions: Some(0o600),
            ..Default::default()
        };
        opts.write().await.unwrap();

        opts.append = true;
        opts.content = b"two\n".to_vec();
        opts.write().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_validate() {
        assert!(WriteFileOptions::default().write().await.is_err());

        let opts = WriteFileOptions {
            path: "/tmp/unused".into(),
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().is_validation());
    }
}
