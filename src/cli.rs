use clap::Parser;
use std::path::PathBuf;

/// hwprofiled — hardware profile reconciliation daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Start the daemon
    #[arg(long)]
    pub start: bool,

    /// Stop a running daemon
    #[arg(long)]
    pub stop: bool,

    /// Stop a running daemon and start again
    #[arg(long)]
    pub reload: bool,

    /// Validate and install a new settings file, then restart
    #[arg(long = "new_settings", value_name = "PATH")]
    pub new_settings: Option<PathBuf>,

    /// Validate and install a new profiles file, then restart
    #[arg(long = "new_profiles", value_name = "PATH")]
    pub new_profiles: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Configuration directory (default: /etc/hwprofiled)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// PID file path (default: /run/hwprofiled.pid)
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,
}

/// What the invocation asks for. At most one action is honored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Reload,
    NewSettings(PathBuf),
    NewProfiles(PathBuf),
}

impl Cli {
    pub fn action(&self) -> Option<Action> {
        if self.stop {
            Some(Action::Stop)
        } else if self.reload {
            Some(Action::Reload)
        } else if let Some(path) = &self.new_settings {
            Some(Action::NewSettings(path.clone()))
        } else if let Some(path) = &self.new_profiles {
            Some(Action::NewProfiles(path.clone()))
        } else if self.start {
            Some(Action::Start)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn no_flags_means_no_action() {
        let cli = Cli::parse_from(["hwprofiled"]);
        assert_eq!(cli.action(), None);
    }

    #[test]
    fn start_flag_selects_start() {
        let cli = Cli::parse_from(["hwprofiled", "--start"]);
        assert_eq!(cli.action(), Some(Action::Start));
    }

    #[test]
    fn new_settings_carries_its_path() {
        let cli = Cli::parse_from(["hwprofiled", "--new_settings", "/tmp/settings.yml"]);
        assert_eq!(
            cli.action(),
            Some(Action::NewSettings(PathBuf::from("/tmp/settings.yml")))
        );
    }

    #[test]
    fn stop_wins_over_start() {
        let cli = Cli::parse_from(["hwprofiled", "--start", "--stop"]);
        assert_eq!(cli.action(), Some(Action::Stop));
    }
}
