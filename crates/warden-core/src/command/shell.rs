use crate::error::{Error, Result};

/// Characters that mark a single argument as a whole command line.
const METACHARACTERS: &[char] = &[' ', '\t', '\n', '"', '\''];

pub(crate) fn needs_split(arg: &str) -> bool {
    arg.contains(METACHARACTERS)
}

/// Splits a command line into words the way a POSIX shell would, without
/// any expansion.
pub(crate) fn split(line: &str) -> Result<Vec<String>> {
    shell_words::split(line)
        .map_err(|err| Error::Validation(format!("cannot split `{line}`: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        assert_eq!(split("echo hello  world").unwrap(), vec!["echo", "hello", "world"]);
        assert_eq!(
            split(r#"sh -c 'echo "a b"; exit 1'"#).unwrap(),
            vec!["sh", "-c", r#"echo "a b"; exit 1"#]
        );
        assert_eq!(split(r#"a "x\"y" it\'s"#).unwrap(), vec!["a", "x\"y", "it's"]);
        assert!(split("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_unterminated() {
        assert!(split("echo 'oops").unwrap_err().is_validation());
        assert!(split(r#"echo "oops"#).is_err());
    }

    #[test]
    fn test_needs_split() {
        assert!(needs_split("echo hi"));
        assert!(needs_split("'quoted'"));
        assert!(!needs_split("ls"));
    }
}
