//! Console grammar.
//!
//! One command per line, keywords matched case-insensitively, arguments
//! separated by blanks. Parsing is done with `winnow` combinators directly on
//! the line text.

use gearbox_core::config::SearchStrategy;
use gearbox_core::failsafe::Peer;
use winnow::ascii::{Caseless, Uint, dec_uint, space1};
use winnow::combinator::{alt, eof, opt, peek, preceded, separated_pair, terminated};
use winnow::error::{ContextError, ErrMode, ParserError, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

/// A parsed console command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Up,
    Down,
    Neutral,
    /// Repeated neutral search, optionally switching the strategy first.
    Repeat(Option<SearchStrategy>),
    Launch,
    /// Advance by whole scheduler ticks (10 ms).
    Tick(u32),
    /// Advance by milliseconds.
    Wait(u32),
    Silence(Peer),
    Resume(Peer),
    Clutch { left: u16, right: u16 },
    Brake(u16),
    /// Neutral window of the simulated gearbox, in timer ticks.
    Window { low: u16, high: u16 },
    Gear,
    Status,
    Help(Option<&'static str>),
    Exit,
}

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("up", "up                      - request an up-shift"),
    ("down", "down                    - request a down-shift"),
    ("neutral", "neutral                 - single neutral attempt"),
    (
        "repeat",
        "repeat [linear|bisect]  - repeated neutral search",
    ),
    ("launch", "launch                  - launch-control pulse"),
    ("tick", "tick <n>                - advance n scheduler ticks (10 ms)"),
    ("wait", "wait <ms>               - advance simulated time"),
    ("silence", "silence <dta|front|mid> - stop a peer's frames"),
    ("resume", "resume <dta|front|mid>  - restart a peer's frames"),
    ("clutch", "clutch <left> <right>   - raw paddle positions from the mid node"),
    ("brake", "brake <pressure>        - brake pressure from the front node"),
    ("window", "window <low> <high>     - neutral window of the gearbox"),
    ("gear", "gear                    - gear seen by the node and the gearbox"),
    ("status", "status                  - node state summary"),
    ("help", "help [topic]            - show help for a command"),
    ("exit", "exit                    - leave the emulator"),
];

/// Parses one console line.
pub fn parse(line: &str) -> Result<Command, String> {
    command
        .parse(line.trim())
        .map_err(|error| error.to_string())
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        keyword("up").value(Command::Up),
        keyword("down").value(Command::Down),
        keyword("neutral").value(Command::Neutral),
        preceded(keyword("repeat"), opt(preceded(space1, strategy))).map(Command::Repeat),
        keyword("launch").value(Command::Launch),
        preceded((keyword("tick"), space1), number).map(Command::Tick),
        preceded((keyword("wait"), space1), number).map(Command::Wait),
        preceded((keyword("silence"), space1), peer).map(Command::Silence),
        preceded((keyword("resume"), space1), peer).map(Command::Resume),
        preceded(
            (keyword("clutch"), space1),
            separated_pair(number, space1, number),
        )
        .map(|(left, right)| Command::Clutch { left, right }),
        preceded((keyword("brake"), space1), number).map(Command::Brake),
        preceded(
            (keyword("window"), space1),
            separated_pair(number, space1, number),
        )
        .map(|(low, high)| Command::Window { low, high }),
        keyword("gear").value(Command::Gear),
        keyword("status").value(Command::Status),
        preceded(keyword("help"), opt(preceded(space1, topic))).map(Command::Help),
        alt((keyword("exit"), keyword("quit"))).value(Command::Exit),
    ))
    .context(StrContext::Label("command"))
    .parse_next(input)
}

/// Matches `word` as a whole word.
fn keyword<'i>(word: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(literal(Caseless(word)), peek(alt((space1, eof))))
}

fn number<T: Uint>(input: &mut &str) -> ModalResult<T> {
    dec_uint::<_, T, _>
        .context(StrContext::Expected(StrContextValue::Description("number")))
        .parse_next(input)
}

fn strategy(input: &mut &str) -> ModalResult<SearchStrategy> {
    alt((
        keyword("linear").value(SearchStrategy::Linear),
        alt((keyword("bisect"), keyword("bisection"))).value(SearchStrategy::Bisection),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "linear or bisect",
    )))
    .parse_next(input)
}

fn peer(input: &mut &str) -> ModalResult<Peer> {
    alt((
        keyword("dta").value(Peer::Dta),
        keyword("front").value(Peer::Front),
        keyword("mid").value(Peer::Mid),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "dta, front or mid",
    )))
    .parse_next(input)
}

fn topic(input: &mut &str) -> ModalResult<&'static str> {
    let word = take_while::<_, _, ErrMode<ContextError>>(1.., |c: char| c.is_ascii_alphabetic())
        .parse_next(input)?;
    HELP_TOPICS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(word))
        .map(|(name, _)| *name)
        .ok_or_else(|| ErrMode::from_input(&*input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_keywords() {
        assert_eq!(parse("up"), Ok(Command::Up));
        assert_eq!(parse("  DOWN "), Ok(Command::Down));
        assert_eq!(parse("neutral"), Ok(Command::Neutral));
        assert_eq!(parse("launch"), Ok(Command::Launch));
        assert_eq!(parse("quit"), Ok(Command::Exit));
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(parse("tick 150"), Ok(Command::Tick(150)));
        assert_eq!(parse("wait 2500"), Ok(Command::Wait(2500)));
        assert_eq!(
            parse("clutch 400  470"),
            Ok(Command::Clutch {
                left: 400,
                right: 470
            })
        );
        assert_eq!(parse("silence mid"), Ok(Command::Silence(Peer::Mid)));
        assert_eq!(parse("resume Front"), Ok(Command::Resume(Peer::Front)));
        assert_eq!(
            parse("window 500 560"),
            Ok(Command::Window {
                low: 500,
                high: 560
            })
        );
    }

    #[test]
    fn repeat_strategy_is_optional() {
        assert_eq!(parse("repeat"), Ok(Command::Repeat(None)));
        assert_eq!(
            parse("repeat bisect"),
            Ok(Command::Repeat(Some(SearchStrategy::Bisection)))
        );
        assert_eq!(
            parse("repeat linear"),
            Ok(Command::Repeat(Some(SearchStrategy::Linear)))
        );
        assert!(parse("repeat sideways").is_err());
    }

    #[test]
    fn help_topics_resolve() {
        assert_eq!(parse("help"), Ok(Command::Help(None)));
        assert_eq!(parse("help clutch"), Ok(Command::Help(Some("clutch"))));
        assert!(parse("help nothing").is_err());
    }

    #[test]
    fn rejects_partial_words_and_bad_numbers() {
        assert!(parse("upshift").is_err());
        assert!(parse("tick").is_err());
        assert!(parse("tick -3").is_err());
        assert!(parse("clutch 400").is_err());
        assert!(parse("silence engine").is_err());
        assert!(parse("").is_err());
    }
}
