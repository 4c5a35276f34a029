//! DTMF command aggregation.
//!
//! Digits arrive one at a time from the backend; a per-session FIFO plus a
//! restartable inter-digit timer turns them into fixed-length commands. The
//! first digit names the command, the remainder is its argument.

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use confab_core::config::DtmfConfig;

/// Parsed DTMF command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtmfCommand {
    /// `*` with no recognized sub-argument: put this media on the video floor
    SetVideoFloor,
    /// `*3`: toggle subtitles room-wide
    ToggleSubtitle,
    /// `*4`: toggle subtitles for this media only
    ToggleMediaSubtitle,
    /// `#<layout>`: switch the mixer layout
    SetLayout { layout: String },
}

/// Per-session digit FIFO with a restartable timer
#[derive(Debug)]
pub struct DtmfAggregator {
    timeout: Duration,
    code_length: usize,
    queue: Vec<String>,
    deadline: Option<Instant>,
}

impl DtmfAggregator {
    #[must_use]
    pub fn new(config: &DtmfConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            code_length: config.code_length.max(1),
            queue: Vec::new(),
            deadline: None,
        }
    }

    /// Feed one digit. Returns a command when the queue reaches the
    /// configured length within the timeout.
    ///
    /// Tones are strings because `*` and `#` may also arrive as their
    /// RFC 4733 event codes `10` and `11`.
    pub fn push(&mut self, tone: impl Into<String>) -> Option<DtmfCommand> {
        let tone = tone.into();
        let now = Instant::now();
        let timer_active = self.deadline.is_some_and(|deadline| now < deadline);

        if timer_active {
            self.queue.push(tone);
            if self.queue.len() >= self.code_length {
                return self.flush();
            }
            self.deadline = Some(now + self.timeout);
            None
        } else {
            self.queue.clear();
            self.queue.push(tone);
            if self.queue.len() >= self.code_length {
                return self.flush();
            }
            self.deadline = Some(now + self.timeout);
            None
        }
    }

    fn flush(&mut self) -> Option<DtmfCommand> {
        let digits = std::mem::take(&mut self.queue);
        self.deadline = None;

        let mut digits = digits.into_iter();
        let command = digits.next()?;
        let argument: String = digits.collect::<Vec<_>>().join("");
        debug!(command = %command, argument = %argument, "DTMF command complete");

        match command.as_str() {
            "*" | "10" => Some(match argument.as_str() {
                "3" => DtmfCommand::ToggleSubtitle,
                "4" => DtmfCommand::ToggleMediaSubtitle,
                _ => DtmfCommand::SetVideoFloor,
            }),
            "#" | "11" => Some(DtmfCommand::SetLayout { layout: argument }),
            other => {
                warn!(command = %other, "Unknown DTMF command, discarding");
                None
            }
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> DtmfAggregator {
        DtmfAggregator::new(&DtmfConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_subtitle_toggle_within_timeout() {
        let mut agg = aggregator();
        assert_eq!(agg.push("*"), None);
        assert_eq!(agg.push("3"), Some(DtmfCommand::ToggleSubtitle));
        assert_eq!(agg.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_restarts_queue() {
        let mut agg = aggregator();
        assert_eq!(agg.push("*"), None);
        assert_eq!(agg.push("3"), Some(DtmfCommand::ToggleSubtitle));
        // Next digit starts a fresh command
        assert_eq!(agg.push("*"), None);
        assert_eq!(agg.pending(), 1);
        assert_eq!(agg.push("4"), Some(DtmfCommand::ToggleMediaSubtitle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_queue_discarded_after_timeout() {
        let mut agg = aggregator();
        assert_eq!(agg.push("*"), None);

        tokio::time::advance(Duration::from_millis(3001)).await;

        // The stale `*` is dropped; this digit starts a new queue
        assert_eq!(agg.push("#"), None);
        assert_eq!(
            agg.push("0"),
            Some(DtmfCommand::SetLayout {
                layout: "0".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_numeric_aliases() {
        let mut agg = aggregator();
        agg.push("10");
        assert_eq!(agg.push("3"), Some(DtmfCommand::ToggleSubtitle));

        agg.push("11");
        assert_eq!(
            agg.push("2"),
            Some(DtmfCommand::SetLayout {
                layout: "2".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_floor_default_argument() {
        let mut agg = aggregator();
        agg.push("*");
        assert_eq!(agg.push("1"), Some(DtmfCommand::SetVideoFloor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command_discarded() {
        let mut agg = aggregator();
        agg.push("5");
        assert_eq!(agg.push("5"), None);
        assert_eq!(agg.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_code_length() {
        let config = DtmfConfig {
            timeout_ms: 3000,
            code_length: 3,
        };
        let mut agg = DtmfAggregator::new(&config);
        assert_eq!(agg.push("#"), None);
        assert_eq!(agg.push("1"), None);
        assert_eq!(
            agg.push("2"),
            Some(DtmfCommand::SetLayout {
                layout: "12".to_string()
            })
        );
    }
}
