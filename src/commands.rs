//! Command lists and file transfers.
//!
//! Commands come from three places: inline arguments, command files, and
//! named manifests. Files and manifests share one line format: one command
//! per line, blank lines and `#` comments ignored, surrounding whitespace
//! trimmed.

use crate::error::RunnerError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A local file to copy to a remote path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub local: PathBuf,
    pub remote: String,
}

impl FromStr for Transfer {
    type Err = String;

    /// Parse `local=remote`, splitting on the first `=`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (local, remote) = value
            .split_once('=')
            .ok_or_else(|| "upload format must be local=remote".to_string())?;
        Ok(Self {
            local: PathBuf::from(local),
            remote: remote.to_string(),
        })
    }
}

/// Extract commands from newline-delimited text.
pub fn parse_command_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read a command file from disk.
pub fn load_command_file(path: &Path) -> Result<Vec<String>, RunnerError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        RunnerError::InvalidConfig(format!("cannot read command file {}: {}", path.display(), e))
    })?;
    Ok(parse_command_lines(&text))
}

/// Inline commands first, then each file's commands in file order.
pub fn assemble_commands(
    inline: &[String],
    files: &[PathBuf],
) -> Result<Vec<String>, RunnerError> {
    let mut commands = inline.to_vec();
    for file in files {
        commands.extend(load_command_file(file)?);
    }
    Ok(commands)
}

/// A named command list kept as data, separate from the engine that runs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandManifest {
    pub name: String,
    pub commands: Vec<String>,
}

const PROFILE_REMEDIATION: &str = include_str!("../manifests/profile-remediation.txt");

impl CommandManifest {
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            commands: parse_command_lines(text),
        }
    }

    /// Load a manifest file, naming it after the file stem.
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            commands: load_command_file(path)?,
        })
    }

    /// Cleans an injected `/etc/profile`, restarts services, then reboots.
    pub fn profile_remediation() -> Self {
        Self::parse("profile-remediation", PROFILE_REMEDIATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_upload() {
        let transfer: Transfer = "dist/app.tar.gz=/opt/app.tar.gz".parse().unwrap();
        assert_eq!(transfer.local, PathBuf::from("dist/app.tar.gz"));
        assert_eq!(transfer.remote, "/opt/app.tar.gz");
    }

    #[test]
    fn test_parse_upload_splits_on_first_equals() {
        let transfer: Transfer = "a.env=/etc/app/a=b.env".parse().unwrap();
        assert_eq!(transfer.local, PathBuf::from("a.env"));
        assert_eq!(transfer.remote, "/etc/app/a=b.env");
    }

    #[test]
    fn test_parse_upload_requires_equals() {
        assert!("no-separator".parse::<Transfer>().is_err());
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        assert_eq!(parse_command_lines("# comment\n\n ls \n"), vec!["ls"]);
    }

    #[test]
    fn test_indented_comment_skipped() {
        let commands = parse_command_lines("  # indented\nuptime\n\t\ndf -h # trailing stays\n");
        assert_eq!(commands, vec!["uptime", "df -h # trailing stays"]);
    }

    #[test]
    fn test_assemble_order() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "a1\n# skip\na2").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(second, "b1").unwrap();

        let commands = assemble_commands(
            &["inline".to_string()],
            &[first.path().to_path_buf(), second.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(commands, vec!["inline", "a1", "a2", "b1"]);
    }

    #[test]
    fn test_missing_command_file() {
        let err = assemble_commands(&[], &[PathBuf::from("/nonexistent/cmds.txt")]).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidConfig(_)));
    }

    #[test]
    fn test_profile_remediation_manifest() {
        let manifest = CommandManifest::profile_remediation();
        assert_eq!(manifest.name, "profile-remediation");
        assert_eq!(manifest.commands.len(), 8);
        assert!(manifest.commands[0].starts_with("cp /etc/profile /etc/profile.bak."));
        assert!(manifest.commands[1].contains("sed -n '1,27p' /etc/profile"));
        assert!(manifest.commands[2].contains(r"x86_64.kok\|x86_32.kok\|logic.sh"));
        assert_eq!(
            manifest.commands.last().unwrap(),
            "nohup bash -c 'sleep 2; reboot' >/dev/null 2>&1 &"
        );
    }

    #[test]
    fn test_manifest_load_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotate-logs.txt");
        std::fs::write(&path, "# rotate\nlogrotate -f /etc/logrotate.conf\n").unwrap();

        let manifest = CommandManifest::load(&path).unwrap();
        assert_eq!(manifest.name, "rotate-logs");
        assert_eq!(manifest.commands, vec!["logrotate -f /etc/logrotate.conf"]);
    }
}
