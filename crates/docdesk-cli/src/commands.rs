//! Input lines understood by the terminal driver.
//!
//! Anything that is not a command counts as a key press, which is how the
//! driver feeds the activity monitor.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Activity,
    Stay,
    Refresh,
    Login,
    Logout,
    Status,
    Dismiss(u64),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Command::Activity;
        };

        match word.to_lowercase().as_str() {
            "stay" => Command::Stay,
            "refresh" => Command::Refresh,
            "login" => Command::Login,
            "logout" => Command::Logout,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "dismiss" => match parts.next().and_then(|n| n.trim_start_matches('#').parse().ok()) {
                Some(id) => Command::Dismiss(id),
                None => Command::Activity,
            },
            _ => Command::Activity,
        }
    }
}

pub const HELP: &str = "\
Commands:
  stay         stay signed in when the expiry warning is shown
  refresh      refresh the session token
  login        sign in
  logout       sign out
  status       show session and watchdog state
  dismiss <n>  dismiss notification #n
  help         show this help
  quit         exit
Any other input counts as activity.";
