use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    process,
};

use anyhow::{anyhow, bail, Context as _};
use colored::Colorize;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use lispy::{
    interpreter::parse_max_depth,
    read,
    repl::{LispHelper, Repl, PROMPT},
    Config, Expression, InPort, Interpreter, LispError,
};

const USAGE: &str = "\
Usage: lispy [OPTIONS] [FILE]

With no FILE, starts an interactive session.

Options:
  -l, --load         Evaluate FILE with each result echoed, then start a session
      --max-depth N  Evaluation depth limit (0 or `none` for no limit)
  -h, --help         Show this help message

Environment variables:
  LISPY_MAX_DEPTH    Default for --max-depth
  RUST_LOG           Log filter for diagnostics on stderr (default `warn`)";

struct Options {
    source: Option<String>,
    load: bool,
    config: Config,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut options = Options {
        source: None,
        load: false,
        config: Config::from_env(),
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-l" | "--load" => options.load = true,
            "--max-depth" => {
                let value = args.next().context("--max-depth requires a value")?;
                options.config.max_depth = parse_max_depth(&value)
                    .ok_or_else(|| anyhow!("invalid depth limit `{value}`"))?;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                process::exit(0);
            }
            other if other.starts_with('-') && other != "-" => {
                bail!("unknown option `{other}`, try `lispy --help`")
            }
            path => {
                if options.source.replace(path.to_string()).is_some() {
                    bail!("only one source file may be given");
                }
            }
        }
    }
    if options.load && options.source.is_none() {
        bail!("--load requires a FILE");
    }
    Ok(options)
}

fn report(error: &LispError) {
    eprintln!("{} {error}", "error:".red().bold());
}

fn open(path: &str) -> anyhow::Result<InPort<Box<dyn BufRead>>> {
    let reader: Box<dyn BufRead> = if path == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(path).with_context(|| format!("cannot open `{path}`"))?;
        Box::new(BufReader::new(file))
    };
    Ok(InPort::new(reader))
}

/// Evaluates the file, echoing each expression and its value. Stops at the
/// first error, which is reported but not fatal.
fn load_echoing<R: BufRead>(interpreter: &Interpreter, port: &mut InPort<R>) {
    loop {
        let expr = match read(port) {
            Ok(Some(expr)) => expr,
            Ok(None) => return,
            Err(error) => return report(&error),
        };
        println!("{PROMPT}{expr}");
        match interpreter.eval(&expr, interpreter.global()) {
            Ok(Expression::Void) => {}
            Ok(value) => println!("{value}"),
            Err(error) => return report(&error),
        }
    }
}

/// Evaluates every expression on an entered line in order, echoing values.
fn evaluate_line(interpreter: &Interpreter, line: &str) {
    let mut port: InPort<&[u8]> = InPort::from(line);
    loop {
        let result = read(&mut port).and_then(|expr| {
            expr.map(|expr| interpreter.eval(&expr, interpreter.global()))
                .transpose()
        });
        match result {
            Ok(None) => return,
            Ok(Some(Expression::Void)) => {}
            Ok(Some(value)) => println!("{value}"),
            Err(error) => return report(&error),
        }
    }
}

fn run_repl(interpreter: &Interpreter) -> anyhow::Result<()> {
    let mut repl = Repl::new()?;
    repl.set_helper(Some(LispHelper));
    loop {
        match repl.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                repl.add_history_entry(line.as_str())?;
                evaluate_line(interpreter, &line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(error) => return Err(error.into()),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let options = parse_args()?;
    let interpreter = Interpreter::with_config(options.config);

    match options.source {
        None => run_repl(&interpreter),
        Some(path) if options.load => {
            load_echoing(&interpreter, &mut open(&path)?);
            run_repl(&interpreter)
        }
        Some(path) => {
            if let Err(error) = interpreter.load(&mut open(&path)?) {
                report(&error);
                process::exit(1);
            }
            Ok(())
        }
    }
}
