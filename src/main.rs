use anyhow::Result;
use clap::Parser as ClapParser;
use lox_lang::config::{RuntimeConfig, DEFAULT_MAX_CALL_DEPTH};
use lox_lang::session::Session;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(name = "lox")]
#[command(about = "A tree-walking interpreter for Lox")]
struct Cli {
    /// Script file to run (omit for REPL)
    script: Option<PathBuf>,

    /// Maximum nesting of function calls before a stack overflow error
    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let runtime_config = RuntimeConfig {
        max_call_depth: cli.max_call_depth,
    };
    let mut session = Session::new(io::stdout(), runtime_config);

    match cli.script {
        None => run_prompt(&mut session),
        Some(path) => Ok(run_file(&path, &mut session)),
    }
}

// Logging is opt-in via RUST_LOG, and goes to stderr so it never mixes with
// program output.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_file(path: &Path, session: &mut Session<Stdout>) -> ExitCode {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Error: could not read '{}': {}", path.display(), e);
            return ExitCode::from(74);
        }
    };

    match session.run(&contents) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run_prompt(session: &mut Session<Stdout>) -> Result<ExitCode> {
    let mut rl = DefaultEditor::new()?;
    let mut buffer = String::new();

    let history_path = dirs::home_dir().map(|p| p.join(".lox_history"));
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = if buffer.is_empty() { "> " } else { "| " };

        match rl.readline(prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');

                if is_complete(&buffer) {
                    if !buffer.trim().is_empty() {
                        let _ = rl.add_history_entry(buffer.trim());
                        // errors end this input, not the session
                        if let Err(e) = session.run(&buffer) {
                            eprintln!("{}", e);
                        }
                    }
                    buffer.clear();
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                println!("^C");
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        let _ = rl.save_history(path);
    }

    Ok(ExitCode::SUCCESS)
}

/// Whether `code` can be handed to the interpreter, or the prompt should keep
/// reading lines: brackets must balance and no string or block comment may
/// still be open.
fn is_complete(code: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut in_comment = false;
    let mut iter = code.chars().peekable();

    while let Some(c) = iter.next() {
        if in_string {
            if c == '"' {
                in_string = false;
            }
            continue;
        }

        if in_comment {
            if c == '*' && iter.peek() == Some(&'/') {
                iter.next();
                in_comment = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '/' => match iter.peek() {
                Some('/') => {
                    while let Some(&next) = iter.peek() {
                        if next == '\n' {
                            break;
                        }
                        iter.next();
                    }
                }
                Some('*') => {
                    iter.next();
                    in_comment = true;
                }
                _ => {}
            },
            '{' | '(' => depth += 1,
            '}' | ')' => depth -= 1,
            _ => {}
        }
    }

    depth <= 0 && !in_string && !in_comment
}
