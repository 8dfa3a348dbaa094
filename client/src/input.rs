//! Intent sampling for the local participant
//!
//! The session never polls devices. It samples an [`IntentSource`] once per
//! tick; [`InputManager`] is the text-driven source used by the binary.

use log::warn;
use shared::{ActionMask, Command, FIXED_SCALE};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// What the local player wants this tick, in fixed-point units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intent {
    pub destination: Option<(i32, i32)>,
    pub shoot: bool,
}

impl Intent {
    pub fn move_to(x: i32, y: i32) -> Self {
        Self {
            destination: Some((x, y)),
            shoot: false,
        }
    }

    pub fn shoot() -> Self {
        Self {
            destination: None,
            shoot: true,
        }
    }

    /// Builds the command executing this intent at `execution_tick`
    pub fn to_command(&self, issuer: u8, execution_tick: u32) -> Command {
        let mut action = ActionMask::empty();
        let (dest_x, dest_y) = self.destination.unwrap_or((0, 0));
        if self.destination.is_some() {
            action |= ActionMask::MOVE;
        }
        if self.shoot {
            action |= ActionMask::SHOOT;
        }
        if action.is_empty() {
            action = ActionMask::IDLE;
        }

        Command {
            issuer,
            execution_tick,
            action,
            dest_x,
            dest_y,
            sequence: 0,
        }
    }
}

pub trait IntentSource {
    fn sample(&mut self) -> Intent;
}

/// A single parsed control line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    MoveTo(i32, i32),
    Shoot,
}

/// Parses `move X Y` (screen units) or `shoot`
pub fn parse_control_line(line: &str) -> Option<ControlLine> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "shoot" => Some(ControlLine::Shoot),
        "move" => {
            let x: i32 = words.next()?.parse().ok()?;
            let y: i32 = words.next()?.parse().ok()?;
            if words.next().is_some() {
                return None;
            }
            Some(ControlLine::MoveTo(
                x.checked_mul(FIXED_SCALE)?,
                y.checked_mul(FIXED_SCALE)?,
            ))
        }
        _ => None,
    }
}

/// Merges control lines that arrived since the last tick
pub struct InputManager {
    lines: mpsc::UnboundedReceiver<String>,
    pending: Intent,
}

impl InputManager {
    pub fn new(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines,
            pending: Intent::default(),
        }
    }
}

impl IntentSource for InputManager {
    fn sample(&mut self) -> Intent {
        while let Ok(line) = self.lines.try_recv() {
            match parse_control_line(&line) {
                Some(ControlLine::MoveTo(x, y)) => self.pending.destination = Some((x, y)),
                Some(ControlLine::Shoot) => self.pending.shoot = true,
                None => warn!("Unknown command {:?} (try `move X Y` or `shoot`)", line),
            }
        }
        std::mem::take(&mut self.pending)
    }
}

/// Forwards non-empty stdin lines until EOF
pub fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    spawn_line_reader(tokio::io::stdin())
}

/// Forwards trimmed non-empty lines of `reader` until EOF
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if tx.send(line.to_string()).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_lines() {
        assert_eq!(
            parse_control_line("move 320 240"),
            Some(ControlLine::MoveTo(320_000, 240_000))
        );
        assert_eq!(parse_control_line("  shoot "), Some(ControlLine::Shoot));
        assert_eq!(parse_control_line("move 1"), None);
        assert_eq!(parse_control_line("move 1 2 3"), None);
        assert_eq!(parse_control_line("move x 2"), None);
        assert_eq!(parse_control_line("move 3000000 0"), None);
        assert_eq!(parse_control_line("jump"), None);
    }

    #[test]
    fn test_intent_to_command() {
        let command = Intent::move_to(5, 6).to_command(2, 9);
        assert_eq!(command.action, ActionMask::MOVE);
        assert_eq!((command.dest_x, command.dest_y), (5, 6));
        assert_eq!((command.issuer, command.execution_tick), (2, 9));

        assert_eq!(Intent::shoot().to_command(1, 0).action, ActionMask::SHOOT);
        assert_eq!(Intent::default().to_command(1, 0).action, ActionMask::IDLE);

        let both = Intent {
            destination: Some((1, 1)),
            shoot: true,
        };
        assert_eq!(
            both.to_command(1, 0).action,
            ActionMask::MOVE | ActionMask::SHOOT
        );
    }

    #[test]
    fn test_input_manager_merges_lines_per_sample() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut input = InputManager::new(rx);
        assert_eq!(input.sample(), Intent::default());

        tx.send("move 10 10".into()).unwrap();
        tx.send("shoot".into()).unwrap();
        tx.send("dance".into()).unwrap();
        tx.send("move 20 30".into()).unwrap();

        let intent = input.sample();
        assert_eq!(intent.destination, Some((20_000, 30_000)));
        assert!(intent.shoot);

        // Consumed by the previous sample
        assert_eq!(input.sample(), Intent::default());
    }

    #[tokio::test]
    async fn test_line_reader_skips_blank_lines() {
        let reader = tokio_test::io::Builder::new()
            .read(b"move 1 2\n\n   \n")
            .read(b"  shoot  \n")
            .build();
        let mut lines = spawn_line_reader(reader);

        assert_eq!(lines.recv().await.as_deref(), Some("move 1 2"));
        assert_eq!(lines.recv().await.as_deref(), Some("shoot"));
        assert_eq!(lines.recv().await, None);
    }
}
