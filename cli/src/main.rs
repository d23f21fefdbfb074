mod test_runner;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{
    Color, ColorChoice, ColorSpec, StandardStream, WriteColor,
};

use engine::context::Frame;
use engine::{EngineError, EngineWarning, Machine, ReaderRegistry, Value};

const SUBCOMMANDS: &[&str] = &["run", "test", "help"];

#[derive(Parser)]
#[command(name = "sigil", version, about = "Directive-driven source preprocessor")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Preprocess a source file
    Run(RunArgs),

    /// Run .test.sg test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Source file to preprocess
    file: String,

    /// Define a context variable: NAME=value (bare NAME defines true)
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
    define: Vec<String>,

    /// Emit #line control statements at file boundaries
    #[arg(long)]
    line_control: bool,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Parse only, don't execute (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Dump the parsed instruction list
    #[arg(long)]
    ast: bool,

    /// Suppress preprocessed output (just check for errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.sg file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // Backwards compatibility: if the first positional arg is not a known
    // subcommand, inject "run" so `sigil file.sg` works like `sigil run file.sg`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(first_pos) = args.iter().skip(1).find(|a| !a.starts_with('-')) {
        let first_pos = first_pos.clone();
        if !SUBCOMMANDS.contains(&first_pos.as_str()) {
            let pos = args.iter().position(|a| *a == first_pos).unwrap();
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);

    match cli.command {
        Command::Run(run_args) => do_run(run_args, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn do_run(args: RunArgs, no_color: bool) {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    // Read source
    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    // Set up codespan file database for spanned diagnostics
    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());

    let source_path = Path::new(&args.file);
    let file_name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.clone());
    let base_dir = source_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let dir_name = source_path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();

    // --check / --ast: parse only
    if args.check || args.ast {
        let mut parser = sigil::Parser::new();
        parser.file = file_name.clone();
        match parser.parse(&source) {
            Ok(instructions) => {
                if args.ast {
                    println!("{:#?}", instructions);
                } else {
                    eprintln!("ok: {} parsed successfully", args.file);
                }
            }
            Err(error) => {
                let diagnostic = error.to_diagnostic(file_id);
                let _ =
                    term::emit(&mut writer.lock(), &config, &files, &diagnostic);
                process::exit(1);
            }
        }
        return;
    }

    // Build the caller-supplied context from -D defines
    let mut context = Frame::new();
    for define in &args.define {
        let (name, value) = parse_define(define);
        context.insert(name, value);
    }

    let mut machine = Machine::new(ReaderRegistry::with_defaults(&base_dir));
    machine.set_origin(file_name.clone(), dir_name);
    machine.generate_line_control = args.line_control;

    let result = machine.execute_with(&source, context);

    for warning in machine.warnings() {
        emit_warning(&writer, warning);
    }

    match result {
        Ok(expanded) => {
            if let Some(out_path) = &args.output {
                if let Err(e) = std::fs::write(out_path, &expanded) {
                    eprintln!("error: cannot write '{}': {}", out_path, e);
                    process::exit(1);
                }
            } else if !args.quiet {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(expanded.as_bytes());
                let _ = stdout.flush();
            }
        }
        Err(error) => {
            emit_engine_error(&writer, &config, &files, file_id, &file_name, &error);
            process::exit(1);
        }
    }
}

fn emit_engine_error(
    writer: &StandardStream,
    config: &term::Config,
    files: &SimpleFiles<String, String>,
    file_id: usize,
    file_name: &str,
    error: &EngineError,
) {
    // Parse errors in the top-level file carry a span into it; everything
    // else (included files, runtime failures) cites file:line in the message.
    if let EngineError::Parse(parse_error) = error {
        if parse_error.file == file_name {
            let diagnostic = parse_error.to_diagnostic(file_id);
            let _ = term::emit(&mut writer.lock(), config, files, &diagnostic);
            return;
        }
    }
    eprintln!("error: {}", error);
}

fn emit_warning(writer: &StandardStream, warning: &EngineWarning) {
    let mut w = writer.lock();
    let _ = w.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
    let _ = write!(w, "warning");
    let _ = w.reset();
    let _ = writeln!(w, ": {}", warning);
}

/// Parse a -D define into a name and typed value. Numbers become Number,
/// "true"/"false" become Boolean, everything else is String; a bare NAME
/// defines true.
fn parse_define(s: &str) -> (String, Value) {
    match s.split_once('=') {
        Some((name, value)) => (name.to_string(), parse_value(value)),
        None => (s.to_string(), Value::Bool(true)),
    }
}

fn parse_value(s: &str) -> Value {
    if let Ok(n) = s.parse::<f64>() {
        return Value::Number(n);
    }
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Str(s.to_string()),
    }
}
