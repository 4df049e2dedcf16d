//! ## vindkanal-mgmt::command
//! **The line-command grammar of the management console**
//!
//! One command per line. Impairment setters accept a wire-value spec
//! `<base>[+<spread>][U|N]`; the bare spelling (`delay`) sets both
//! directions, while the `LR`/`RL` suffixed spellings set one.

use std::path::PathBuf;

use vindkanal_core::packet::Direction;
use vindkanal_core::wire::{Distribution, Metric, WireValue};

use crate::error::MgmtError;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Load(PathBuf),
    ShowInfo(Option<usize>),
    Set {
        metric: Metric,
        direction: Option<Direction>,
        value: WireValue,
    },
    Fifo(bool),
    NumNodes(usize),
    SetNode(usize),
    SetName(usize, String),
    TransitionTime(u64),
    SetEdge(usize, usize, f64),
    ShowEdges(Option<usize>),
    ShowCurrent,
    Logout,
    Shutdown,
}

/// Parses one console line. Returns `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<Command>, MgmtError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (word, arg) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    if let Some((metric, direction)) = parse_metric_word(word) {
        let value = parse_wire_value(arg)?;
        return Ok(Some(Command::Set {
            metric,
            direction,
            value,
        }));
    }

    let command = match word {
        "help" => Command::Help,
        "load" => {
            require(arg, "file path")?;
            Command::Load(PathBuf::from(arg))
        }
        "showinfo" => Command::ShowInfo(optional_index(arg)?),
        "fifo" => match arg {
            "1" | "on" => Command::Fifo(true),
            "0" | "off" => Command::Fifo(false),
            other => return Err(MgmtError::BadArgument(format!("fifo takes 0 or 1, got {other:?}"))),
        },
        "markov-numnodes" => Command::NumNodes(parse_num(arg, "node count")?),
        "markov-setnode" => Command::SetNode(parse_num(arg, "node index")?),
        "markov-name" => {
            let (index, name) = arg
                .split_once(',')
                .ok_or_else(|| MgmtError::BadArgument("expected n,name".into()))?;
            Command::SetName(parse_num(index.trim(), "node index")?, name.trim().to_string())
        }
        "markov-time" => Command::TransitionTime(parse_num(arg, "milliseconds")?),
        "setedge" => {
            let mut parts = arg.split(',').map(str::trim);
            let from = parse_num(parts.next().unwrap_or(""), "source node")?;
            let to = parse_num(parts.next().unwrap_or(""), "target node")?;
            let weight: f64 = parts
                .next()
                .unwrap_or("")
                .parse()
                .map_err(|_| MgmtError::BadArgument("expected n1,n2,weight".into()))?;
            Command::SetEdge(from, to, weight)
        }
        "showedges" => Command::ShowEdges(optional_index(arg)?),
        "showcurrent" => Command::ShowCurrent,
        "logout" => Command::Logout,
        "shutdown" => Command::Shutdown,
        other => return Err(MgmtError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

/// Matches `delay`, `delayLR`, `delayRL` and likewise for every metric.
fn parse_metric_word(word: &str) -> Option<(Metric, Option<Direction>)> {
    for metric in Metric::ALL {
        let name = metric.name();
        if word == name {
            return Some((metric, None));
        }
        if let Some(suffix) = word.strip_prefix(name) {
            match suffix {
                "LR" => return Some((metric, Some(Direction::LeftToRight))),
                "RL" => return Some((metric, Some(Direction::RightToLeft))),
                _ => {}
            }
        }
    }
    None
}

/// Grammar: `<base>[+<spread>][U|N]`, e.g. `50`, `20+5`, `20+5N`.
pub fn parse_wire_value(spec: &str) -> Result<WireValue, MgmtError> {
    let spec = spec.trim();
    require(spec, "value")?;

    let (spec, distribution) = match spec.chars().last() {
        Some('u') | Some('U') => (&spec[..spec.len() - 1], Distribution::Uniform),
        Some('n') | Some('N') => (&spec[..spec.len() - 1], Distribution::Gaussian),
        _ => (spec, Distribution::Uniform),
    };

    let (base_str, spread_str) = match spec.split_once('+') {
        Some((base, spread)) => (base, Some(spread)),
        None => (spec, None),
    };

    let base: f64 = base_str
        .trim()
        .parse()
        .map_err(|_| MgmtError::BadArgument(format!("bad value {base_str:?}")))?;
    let spread: f64 = match spread_str {
        Some(s) => s
            .trim()
            .parse()
            .map_err(|_| MgmtError::BadArgument(format!("bad spread {s:?}")))?,
        None => 0.0,
    };
    if spread < 0.0 {
        return Err(MgmtError::BadArgument("spread must be non-negative".into()));
    }

    Ok(WireValue::new(base, spread, distribution))
}

fn require(arg: &str, what: &str) -> Result<(), MgmtError> {
    if arg.is_empty() {
        Err(MgmtError::BadArgument(format!("missing {what}")))
    } else {
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(arg: &str, what: &str) -> Result<T, MgmtError> {
    arg.parse()
        .map_err(|_| MgmtError::BadArgument(format!("bad {what}: {arg:?}")))
}

fn optional_index(arg: &str) -> Result<Option<usize>, MgmtError> {
    if arg.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parse_num(arg, "node index")?))
    }
}

pub const HELP_TEXT: &str = "\
COMMAND            HELP
------------       ------------
help               print a summary of mgmt commands
load               load a configuration file
showinfo [n]       show status and parameter values
loss               set loss percentage
lostburst          mean length of lost packet bursts
delay              set delay ms
dup                set dup packet percentage
bandwidth          set channel bandwidth bytes/sec
speed              set interface speed bytes/sec
noise              set noise factor bits/Mbyte
mtu                set channel MTU (bytes)
chanbufsize        set channel buffer size (bytes)
fifo               set channel fifoness
shutdown           shut the channel down
logout             log out from this mgmt session
markov-numnodes n  set number of states
markov-setnode n   set current state
markov-name n,name set state's name
markov-time ms     transition period
setedge n1,n2,w    set edge weight
showedges [n]      show edge weights
showcurrent        show current state
(suffix LR or RL on any setter for one direction)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_and_comments_parse_to_none() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# delay 100").unwrap(), None);
    }

    #[test]
    fn bare_metric_sets_both_directions() {
        let cmd = parse_line("delay 50").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                metric: Metric::Delay,
                direction: None,
                value: WireValue::fixed(50.0),
            }
        );
    }

    #[test]
    fn suffixed_metric_sets_one_direction() {
        let cmd = parse_line("lossRL 10+5N").unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                metric: Metric::Loss,
                direction: Some(Direction::RightToLeft),
                value: WireValue::new(10.0, 5.0, Distribution::Gaussian),
            }
        );
    }

    #[test]
    fn wire_value_grammar() {
        assert_eq!(parse_wire_value("5").unwrap(), WireValue::fixed(5.0));
        assert_eq!(
            parse_wire_value("5+2").unwrap(),
            WireValue::new(5.0, 2.0, Distribution::Uniform)
        );
        assert_eq!(
            parse_wire_value("5+2U").unwrap(),
            WireValue::new(5.0, 2.0, Distribution::Uniform)
        );
        assert_eq!(
            parse_wire_value("5+2n").unwrap(),
            WireValue::new(5.0, 2.0, Distribution::Gaussian)
        );
        assert!(parse_wire_value("").is_err());
        assert!(parse_wire_value("abc").is_err());
        assert!(parse_wire_value("5+-2").is_err());
    }

    #[test]
    fn graph_commands() {
        assert_eq!(
            parse_line("markov-numnodes 4").unwrap().unwrap(),
            Command::NumNodes(4)
        );
        assert_eq!(
            parse_line("setedge 0, 1, 25.5").unwrap().unwrap(),
            Command::SetEdge(0, 1, 25.5)
        );
        assert_eq!(
            parse_line("markov-name 2, rainy day").unwrap().unwrap(),
            Command::SetName(2, "rainy day".into())
        );
        assert_eq!(
            parse_line("showedges").unwrap().unwrap(),
            Command::ShowEdges(None)
        );
        assert_eq!(
            parse_line("showinfo 1").unwrap().unwrap(),
            Command::ShowInfo(Some(1))
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(matches!(
            parse_line("frobnicate 1"),
            Err(MgmtError::UnknownCommand(_))
        ));
    }

    #[test]
    fn fifo_takes_binary_argument() {
        assert_eq!(parse_line("fifo 1").unwrap().unwrap(), Command::Fifo(true));
        assert_eq!(parse_line("fifo 0").unwrap().unwrap(), Command::Fifo(false));
        assert!(parse_line("fifo maybe").is_err());
    }
}
