use std::io::{self, BufRead, Write};
use std::panic;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

use clap::Parser;
use minischeme::lexer::{Token, tokenize};
use minischeme::{EvalConfig, Evaluator, FrameRef, MAX_EVAL_DEPTH, Session, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

/// Interactive minischeme interpreter.
///
/// Set RUST_LOG=minischeme=debug to watch frames and bindings change.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Deepest nested evaluation allowed before a RecursionError
    #[arg(long, default_value_t = MAX_EVAL_DEPTH)]
    max_depth: usize,

    /// Read one {"input": "..."} object per stdin line and answer with
    /// {"output": "..."} instead of running the interactive prompt
    #[arg(long)]
    json: bool,

    /// Source files evaluated into the session before the first prompt
    files: Vec<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = panic::catch_unwind(|| {
        if args.json {
            run_json(&args);
        } else {
            run_repl(&args);
        }
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Build the evaluator and a session with every preload file applied
fn start_session(args: &Args) -> (Evaluator, Session) {
    let evaluator = Evaluator::with_config(EvalConfig {
        max_depth: args.max_depth,
    });
    let session = evaluator.open_session();

    for path in &args.files {
        if let Err(e) = evaluator.evaluate_file(path, Some(Rc::clone(session.frame()))) {
            eprintln!("{}: {e}", path.display());
        }
    }

    (evaluator, session)
}

/// Net count of unclosed parentheses in `source`, comments ignored
fn paren_balance(source: &str) -> isize {
    tokenize(source).iter().fold(0, |balance, token| match token {
        Token::Open => balance + 1,
        Token::Close => balance - 1,
        Token::Atom(_) => balance,
    })
}

fn run_repl(args: &Args) {
    println!("minischeme interpreter");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            process::exit(1);
        }
    };
    let (evaluator, session) = start_session(args);
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "  in> " } else { "  ..> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }

                    // Handle special commands
                    match command {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(session.frame());
                            continue;
                        }
                        ":quit" | ":exit" | "exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                buffer.push_str(&line);
                buffer.push('\n');

                // Keep reading until the parentheses balance
                if paren_balance(&buffer) > 0 {
                    continue;
                }

                let source = std::mem::take(&mut buffer);
                let _ = rl.add_history_entry(source.trim());

                match evaluator.evaluate_source(&source, Some(Rc::clone(session.frame()))) {
                    Ok((Some(value), _)) => println!("  out> {value}"),
                    Ok((None, _)) => {}
                    Err(e) => println!("{e}"),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Line-delimited JSON service loop over stdin/stdout.
///
/// Each reply is the transcript the prompt would have printed: `out> value`
/// for a result, the error line on failure, nothing for an empty result.
fn run_json(args: &Args) {
    let (evaluator, session) = start_session(args);
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(request) => match request.get("input").and_then(serde_json::Value::as_str) {
                Some(input) => answer(&evaluator, &session, input.trim()),
                None => "Error: request must have a string \"input\" field\n".to_owned(),
            },
            Err(err) => format!("Error: invalid JSON: {err}\n"),
        };

        let response = serde_json::json!({ "output": output });
        if writeln!(stdout, "{response}").and_then(|()| stdout.flush()).is_err() {
            break;
        }
    }
}

/// Evaluate one service request against the session
fn answer(evaluator: &Evaluator, session: &Session, input: &str) -> String {
    if input.eq_ignore_ascii_case("exit") {
        return "bye bye!\n".to_owned();
    }
    match evaluator.evaluate_source(input, Some(Rc::clone(session.frame()))) {
        Ok((Some(value), _)) => format!("out> {value}\n"),
        Ok((None, _)) => String::new(),
        Err(e) => format!("{e}\n"),
    }
}

fn print_help() {
    println!("minischeme commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current session bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  exit       - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Input continues over several lines until the parentheses balance.");
    println!("Only the first expression of each input is evaluated; use begin to chain.");
    println!();
    println!("Special forms:");
    println!("  define lambda if cons car cdr list begin del let set!");
    println!("Builtins:");
    println!("  + - * / equal? > >= < <= and or not list? length list-ref append");
    println!();
    println!("Examples:");
    println!("  (define (square x) (* x x))");
    println!("  (let ((a 1) (b 2)) (+ a b))");
    println!("  (list-ref (list 1 2 3) 1)");
    println!();
}

fn print_environment(frame: &FrameRef) {
    let bindings = frame.bindings();

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Primitive(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("Values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
