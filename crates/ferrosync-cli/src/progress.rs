//! Progress bar fed by sync state snapshots

use console::style;
use ferrosync_engine::{SyncProfileStatus, SyncState};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Renders snapshots drained from a channel dispatcher
pub struct ProgressView {
    bar: Option<ProgressBar>,
    drain: JoinHandle<()>,
}

impl ProgressView {
    /// Start draining `receiver`; quiet mode drains without drawing
    pub fn spawn(mut receiver: UnboundedReceiver<SyncState>, quiet: bool) -> Self {
        let bar = if quiet { None } else { Some(create_bar()) };
        let target = bar.clone();

        let drain = tokio::spawn(async move {
            while let Some(state) = receiver.recv().await {
                if let Some(bar) = &target {
                    render(bar, &state);
                }
            }
        });

        Self { bar, drain }
    }

    /// Print a line above the bar
    pub fn println<S: AsRef<str>>(&self, line: S) {
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{}", line.as_ref())),
            None => println!("{}", line.as_ref()),
        }
    }

    /// Stop draining and clear the bar
    pub fn finish(self) {
        self.drain.abort();
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn create_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let template = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:.bold} {msg} [{wide_bar:.cyan/blue}] {pos}/{len}");
    if let Ok(template) = template {
        bar.set_style(template.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn render(bar: &ProgressBar, state: &SyncState) {
    if let Some(profile) = &state.profile {
        bar.set_prefix(profile.clone());
    }
    bar.set_length(state.total);
    bar.set_position(state.count);
    bar.set_message(status_line(state));
}

/// One-line summary of a snapshot
pub fn status_line(state: &SyncState) -> String {
    let status = match state.status {
        SyncProfileStatus::Completed => style(state.status).green(),
        SyncProfileStatus::Failed => style(state.status).red(),
        SyncProfileStatus::Cancelled => style(state.status).yellow(),
        _ => style(state.status).cyan(),
    };
    if state.message.is_empty() {
        status.to_string()
    } else {
        format!("{} {}", status, state.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_includes_message() {
        console::set_colors_enabled(false);
        let state = SyncState {
            status: SyncProfileStatus::Pulling,
            message: "Pulling changes from server".to_string(),
            ..SyncState::default()
        };
        assert_eq!(status_line(&state), "pulling Pulling changes from server");

        let idle = SyncState::default();
        assert_eq!(status_line(&idle), "idle");
    }
}
