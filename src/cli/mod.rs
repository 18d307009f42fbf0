//! Command-line interface for Ember.
//!
//! Thin wrapper over the library: `tokens` dumps the token stream, `ast`
//! prints the tree (or saves/loads its binary encoding), `check` runs the
//! full pipeline. A path of `-` reads stdin.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::debug;

use crate::borrowck::BorrowChecker;
use crate::error::{Diagnostic, DiagnosticLevel, Result};
use crate::lexer::{raw, LexError, Lexer};
use crate::parser::{ast, ParsedProgram, Parser};
use crate::serialize;

#[derive(ClapParser)]
#[command(name = "ember")]
#[command(about = "Front end for a small Rust-like expression language")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for diagnostics.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output (default)
    #[default]
    Human,
    /// JSON, one diagnostic per line
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dump the token stream of a source file
    Tokens {
        /// Path to a source file, or `-` for stdin
        path: PathBuf,

        /// Dump low-level tokens (kind and length) instead of cooked ones
        #[arg(long)]
        raw: bool,

        #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Parse a source file and print its AST
    Ast {
        /// Path to a source file, or `-` for stdin
        path: PathBuf,

        /// Write the binary encoding of the AST to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read a binary-encoded AST (as written by --output) instead of
        /// source text
        #[arg(long)]
        load: bool,

        #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },

    /// Parse and borrow-check a source file
    Check {
        /// Path to a source file, or `-` for stdin
        path: PathBuf,

        #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },
}

pub fn run_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (result, format) = match cli.command {
        Commands::Tokens { path, raw, format } => (tokens_cmd(&path, raw, format), format),
        Commands::Ast {
            path,
            output,
            load,
            format,
        } => (ast_cmd(&path, output.as_deref(), load, format), format),
        Commands::Check { path, format } => (check_cmd(&path, format), format),
    };
    let code = match result {
        Ok(code) => code,
        Err(err) => {
            emit_diagnostics(format, &[Diagnostic::error(err.to_string())]);
            1
        }
    };
    std::process::exit(code);
}

fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        Ok(source)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        std::io::stdin().read_to_end(&mut data)?;
        Ok(data)
    } else {
        Ok(std::fs::read(path)?)
    }
}

// ==== Diagnostic output ====

fn emit_diagnostics(format: OutputFormat, diagnostics: &[Diagnostic]) {
    match format {
        OutputFormat::Human => {
            for diag in diagnostics {
                let label = match diag.level {
                    DiagnosticLevel::Error => "Error".red().bold(),
                    DiagnosticLevel::Warning => "Warning".yellow().bold(),
                    DiagnosticLevel::Note => "Note".blue().bold(),
                };
                match diag.line {
                    Some(line) => eprintln!("{}: line {}: {}", label, line, diag.message),
                    None => eprintln!("{}: {}", label, diag.message),
                }
                for note in &diag.notes {
                    eprintln!("  {} {}", "=".cyan(), note);
                }
            }
        }
        OutputFormat::Json => {
            for diag in diagnostics {
                eprintln!(
                    "{}",
                    serde_json::to_string(diag).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
    }
}

fn lex_diagnostics(errors: &[LexError]) -> Vec<Diagnostic> {
    errors
        .iter()
        .map(|e| Diagnostic::error(e.message.clone()).with_line(e.line))
        .collect()
}

// ==== Commands ====

fn tokens_cmd(path: &Path, dump_raw: bool, format: OutputFormat) -> Result<i32> {
    let source = read_source(path)?;

    if dump_raw {
        let mut offset = 0usize;
        for token in raw::tokenize(&source) {
            println!("{:<6} {:<4} {:?}", offset, token.len, token.kind);
            offset += token.len as usize;
        }
        return Ok(0);
    }

    let (tokens, errors) = Lexer::tokenize(&source);
    debug!(tokens = tokens.len(), errors = errors.len(), "lexed");
    for token in &tokens {
        println!("{:>4}:{:<4} {}", token.line, token.col, token.kind);
    }
    if errors.is_empty() {
        Ok(0)
    } else {
        emit_diagnostics(format, &lex_diagnostics(&errors));
        Ok(1)
    }
}

/// Build a program for `ast`/`check`, reporting lex and parse failures.
/// `Ok(None)` means diagnostics were already emitted.
fn parse_program(source: &str, format: OutputFormat) -> Result<Option<ParsedProgram>> {
    let (tokens, lex_errors) = Lexer::tokenize(source);
    if !lex_errors.is_empty() {
        emit_diagnostics(format, &lex_diagnostics(&lex_errors));
        return Ok(None);
    }

    match Parser::new(tokens).parse_unchecked() {
        Ok(program) => Ok(Some(program)),
        Err(err) => {
            emit_diagnostics(format, &[Diagnostic::error(err.to_string())]);
            Ok(None)
        }
    }
}

fn ast_cmd(path: &Path, output: Option<&Path>, load: bool, format: OutputFormat) -> Result<i32> {
    let program = if load {
        serialize::decode_program(&read_bytes(path)?)?
    } else {
        let source = read_source(path)?;
        match parse_program(&source, format)? {
            Some(program) => program,
            None => return Ok(1),
        }
    };

    for &expr in &program.exprs {
        println!("{}", ast::dump(&program.arena, expr));
    }

    if let Some(output) = output {
        let encoded = serialize::encode_program(&program);
        std::fs::write(output, &encoded)?;
        debug!(bytes = encoded.len(), "wrote encoded program");
    }

    Ok(0)
}

fn check_cmd(path: &Path, format: OutputFormat) -> Result<i32> {
    let source = read_source(path)?;
    let program = match parse_program(&source, format)? {
        Some(program) => program,
        None => return Ok(1),
    };

    // Unlike `parse`, report every violation, not just the first.
    let mut checker = BorrowChecker::new();
    if checker.check(&program.arena, &program.exprs) {
        println!("{}", "borrow check: OK".green());
        return Ok(0);
    }

    let diagnostics: Vec<Diagnostic> = checker
        .get_errors()
        .iter()
        .map(|v| {
            Diagnostic::error(v.message.clone())
                .with_line(v.line)
                .with_note(format!("{:?}", v.kind))
        })
        .collect();
    emit_diagnostics(format, &diagnostics);
    Ok(1)
}
