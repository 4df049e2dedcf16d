//! ## vindkanal-mgmt::dispatch
//! **Executes parsed commands against a link's control handle**
//!
//! Every mutation travels through the link worker, so management traffic
//! can never race the packet path. Config-file loading is sequential
//! replay of the same commands.

use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use vindkanal_core::packet::Direction;
use vindkanal_core::wire::Metric;
use vindkanal_core::LinkHandle;

use crate::command::{parse_line, Command, HELP_TEXT};
use crate::error::MgmtError;

/// Session-level outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Command executed; optional data payload to print before the status.
    Done(Option<String>),
    /// Client asked to end the session.
    Logout,
    /// Client asked to shut the link down.
    Shutdown,
}

/// Executes one command. Show commands return their payload in `Done`.
pub fn dispatch(handle: &LinkHandle, command: Command) -> Result<Outcome, MgmtError> {
    debug!(?command, "mgmt command");
    match command {
        Command::Help => Ok(Outcome::Done(Some(HELP_TEXT.to_string()))),
        Command::Load(path) => {
            replay_script(handle, &path)?;
            Ok(Outcome::Done(None))
        }
        Command::Set {
            metric,
            direction,
            value,
        } => {
            handle.set_value(metric, direction, value)?;
            Ok(Outcome::Done(None))
        }
        Command::Fifo(fifo) => {
            handle.set_fifo(fifo)?;
            Ok(Outcome::Done(None))
        }
        Command::NumNodes(n) => {
            handle.resize(n)?;
            Ok(Outcome::Done(None))
        }
        Command::SetNode(index) => {
            handle.set_current(index)?;
            Ok(Outcome::Done(None))
        }
        Command::SetName(index, name) => {
            handle.set_name(index, name)?;
            Ok(Outcome::Done(None))
        }
        Command::TransitionTime(ms) => {
            handle.set_transition_period(ms)?;
            Ok(Outcome::Done(None))
        }
        Command::SetEdge(from, to, weight) => {
            handle.set_edge(from, to, weight)?;
            Ok(Outcome::Done(None))
        }
        Command::ShowCurrent => {
            let (index, name) = handle.current()?;
            let text = match name {
                Some(name) => format!("current state: {index} ({name})"),
                None => format!("current state: {index}"),
            };
            Ok(Outcome::Done(Some(text)))
        }
        Command::ShowEdges(row) => {
            let (row, weights) = handle.edges(row)?;
            let mut text = format!("edges of state {row}:");
            for (j, weight) in weights.iter().enumerate() {
                let _ = write!(text, "\n  -> {j}: {weight}");
            }
            Ok(Outcome::Done(Some(text)))
        }
        Command::ShowInfo(index) => {
            let info = handle.info(index)?;
            let (queued, bytes) = handle.queue_depth()?;

            let mut text = String::new();
            let name = info.name.as_deref().unwrap_or("-");
            let _ = writeln!(text, "state {} ({name}) of {}", info.index, info.states);
            let _ = writeln!(
                text,
                "current: {}  fifo: {}  markov-time: {}ms",
                info.current, info.fifo as u8, info.transition_period_ms
            );
            let _ = writeln!(text, "queue: {queued} packets, {}/{} bytes LR/RL", bytes[0], bytes[1]);
            for metric in Metric::ALL {
                for dir in Direction::BOTH {
                    let v = info.values[metric.index()][dir.index()];
                    if v.base != 0.0 || v.spread != 0.0 {
                        let _ = writeln!(
                            text,
                            "{} {}: {} +{} {:?}",
                            metric, dir, v.base, v.spread, v.distribution
                        );
                    }
                }
            }
            Ok(Outcome::Done(Some(text.trim_end().to_string())))
        }
        Command::Logout => Ok(Outcome::Logout),
        Command::Shutdown => {
            handle.shutdown();
            Ok(Outcome::Shutdown)
        }
    }
}

/// Replays a management command script line by line.
///
/// `logout` and `shutdown` are ignored inside scripts; a bad line aborts
/// the replay with its parse or execution error.
pub fn replay_script(handle: &LinkHandle, path: &Path) -> Result<(), MgmtError> {
    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        if let Some(command) = parse_line(line)? {
            match command {
                Command::Logout | Command::Shutdown => continue,
                command => {
                    dispatch(handle, command)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use vindkanal_core::prelude::*;

    fn open_link() -> (Link, PairTransport) {
        let (left, right) = PairTransport::pair();
        let options = LinkOptions {
            seed: Some(5),
            ..LinkOptions::default()
        };
        let link = Link::open(Box::new(left), options, None).unwrap();
        (link, right)
    }

    fn run(handle: &LinkHandle, line: &str) -> Result<Outcome, MgmtError> {
        dispatch(handle, parse_line(line).unwrap().unwrap())
    }

    #[test]
    fn setters_apply_to_the_live_link() {
        let (link, far) = open_link();
        let handle = link.handle();

        run(&handle, "loss 100").unwrap();
        link.send(b"gone", 0).unwrap();
        assert!(far.recv_timeout(Duration::from_millis(300)).is_none());

        run(&handle, "loss 0").unwrap();
        link.send(b"through", 0).unwrap();
        assert!(far.recv_timeout(Duration::from_secs(2)).is_some());

        link.close();
    }

    #[test]
    fn show_commands_report_state() {
        let (link, _far) = open_link();
        let handle = link.handle();

        run(&handle, "markov-numnodes 2").unwrap();
        run(&handle, "markov-name 1, stormy").unwrap();
        run(&handle, "markov-setnode 1").unwrap();

        let Outcome::Done(Some(text)) = run(&handle, "showcurrent").unwrap() else {
            panic!("expected payload");
        };
        assert_eq!(text, "current state: 1 (stormy)");

        run(&handle, "setedge 1,0,30").unwrap();
        let Outcome::Done(Some(text)) = run(&handle, "showedges 1").unwrap() else {
            panic!("expected payload");
        };
        assert!(text.contains("-> 0: 30"));
        assert!(text.contains("-> 1: 70"));

        run(&handle, "delay 25+5").unwrap();
        let Outcome::Done(Some(text)) = run(&handle, "showinfo").unwrap() else {
            panic!("expected payload");
        };
        assert!(text.contains("state 1 (stormy) of 2"));
        assert!(text.contains("delay LR: 25 +5"));

        link.close();
    }

    #[test]
    fn out_of_range_index_reports_error_without_crashing() {
        let (link, _far) = open_link();
        let handle = link.handle();

        assert!(run(&handle, "markov-setnode 7").is_err());
        assert!(run(&handle, "setedge 0,9,10").is_err());
        // The link still works afterwards.
        assert!(matches!(
            run(&handle, "showcurrent").unwrap(),
            Outcome::Done(Some(_))
        ));

        link.close();
    }

    #[test]
    fn script_replay_applies_every_line() {
        let (link, _far) = open_link();
        let handle = link.handle();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# sample link config").unwrap();
        writeln!(file, "markov-numnodes 3").unwrap();
        writeln!(file, "delay 10+2").unwrap();
        writeln!(file, "fifo 0").unwrap();
        writeln!(file, "shutdown").unwrap(); // ignored in scripts

        replay_script(&handle, file.path()).unwrap();

        let info = handle.info(None).unwrap();
        assert_eq!(info.states, 3);
        assert!(!info.fifo);
        assert_eq!(info.values[Metric::Delay.index()][0].base, 10.0);

        link.close();
    }

    #[test]
    fn logout_and_shutdown_reach_the_session() {
        let (link, _far) = open_link();
        let handle = link.handle();

        assert_eq!(run(&handle, "logout").unwrap(), Outcome::Logout);
        assert_eq!(run(&handle, "shutdown").unwrap(), Outcome::Shutdown);
        link.close();
    }
}
