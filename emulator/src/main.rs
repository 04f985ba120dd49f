mod command;
mod gearbox;
mod hardware;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use gearbox_core::config::{NodeConfig, REAR_NODE, REAR_NODE_LUR6};
use gearbox_core::node::NodeShared;

use session::{Session, TranscriptLogger};

const USAGE: &str = "Usage: gearbox-emulator [--config <lur7|lur6>] [--transcript <path>]";

struct Options {
    config: NodeConfig,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let transcript = match &options.transcript {
        Some(path) => Some(TranscriptLogger::create(
            path,
            &format!("Rear node emulator transcript ({})", options.config.name),
        )?),
        None => None,
    };

    let shared = NodeShared::new();
    let mut session = Session::new(&shared, options.config, transcript).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Rear node emulator ({}) ready, gearbox in {} with neutral window {}. Type `help` for commands or `exit` to quit.",
        session.node().config().name,
        session.gearbox().gear(),
        session.gearbox().window(),
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }

        if should_terminate(trimmed) {
            break;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        config: REAR_NODE,
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };
        match flag.as_str() {
            "--config" => {
                let tag = value()?;
                options.config = config_from_tag(&tag)?;
            }
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}

fn config_from_tag(tag: &str) -> Result<NodeConfig, String> {
    if tag.eq_ignore_ascii_case("lur7") {
        Ok(REAR_NODE)
    } else if tag.eq_ignore_ascii_case("lur6") {
        Ok(REAR_NODE_LUR6)
    } else {
        Err(format!("Unknown node configuration `{tag}`"))
    }
}
