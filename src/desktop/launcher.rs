/// Process launching through the host shell
///
/// Children are spawned detached: the engine never waits on them, and a
/// failure to spawn is the only error reported back.

use crate::desktop::Launcher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Launcher backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    fn shell_command(line: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(line);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        }
    }
}

/// Command line for an executable plus its raw argument string
pub fn app_command_line(path: &str, args: &str) -> String {
    if args.trim().is_empty() {
        format!("\"{}\"", path)
    } else {
        format!("\"{}\" {}", path, args)
    }
}

#[async_trait]
impl Launcher for SystemLauncher {
    async fn spawn(&self, path: &str, args: &str) -> Result<()> {
        let mut cmd = Self::shell_command(&app_command_line(path, args));
        if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(false)
            .spawn()
            .with_context(|| format!("Failed to start {}", path))?;
        Ok(())
    }

    async fn shell(&self, command: &str) -> Result<()> {
        Self::shell_command(command)
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("Failed to run command: {}", command))?;
        Ok(())
    }

    async fn open_url(&self, url: &str) -> Result<()> {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", ""]).arg(url);
            cmd
        } else if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        };
        cmd.spawn().with_context(|| format!("Failed to open {}", url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_paths_are_quoted() {
        assert_eq!(app_command_line("/opt/My App/run", ""), "\"/opt/My App/run\"");
        assert_eq!(app_command_line("/bin/app", "--fast -v"), "\"/bin/app\" --fast -v");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_commands_spawn_detached() {
        SystemLauncher.shell("true").await.unwrap();
    }
}
