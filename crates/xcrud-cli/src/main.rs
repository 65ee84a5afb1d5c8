//! xcrud CLI
//!
//! Inspect how expressions parse and how statement descriptors compile.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, Subcommand, ValueEnum};
use xcrud::ast::DataModel;
use xcrud::protocol::ClientMessage;
use xcrud::{GrammarStart, Mode, ParseOptions, Statement, StatementRegistry};

#[derive(Parser)]
#[command(name = "xcrud")]
#[command(about = "X Protocol CRUD compiler")]
#[command(after_help = "\
EXAMPLES:
    # Show how an expression parses
    xcrud parse \"age > :min AND name LIKE 'A%'\"

    # Same, resolving identifiers as table columns
    xcrud parse --table \"t.doc->>'$.name' = ?\"

    # Compile a JSON descriptor and print the payload
    xcrud compile find.json --format base64

    # Watch the prepared statement lifecycle over five executions
    xcrud plan find.json --times 5

DESCRIPTOR:
    {\"kind\": \"find\", \"target\": {\"schema\": \"test\", \"name\": \"people\"},
     \"criteria\": \"age > :min\", \"bindings\": {\"min\": 18}, \"limit\": 10}
")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse one expression and print the tree and placeholder table
    Parse {
        expr: String,

        /// Grammar production to start from
        #[arg(long, value_enum, default_value_t = Start::Expr)]
        start: Start,

        /// Resolve bare identifiers as table columns instead of document paths
        #[arg(long)]
        table: bool,
    },
    /// Compile a JSON statement descriptor ("-" reads stdin)
    Compile {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = CompileMode::Execute)]
        mode: CompileMode,

        #[arg(long, value_enum, default_value_t = Format::Debug)]
        format: Format,
    },
    /// Show the messages sent for repeated executions of one descriptor
    Plan {
        file: PathBuf,

        #[arg(long, default_value = "3")]
        times: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Start {
    Expr,
    Sort,
    Projected,
    Column,
    Field,
    AddSub,
    MulDiv,
}

impl From<Start> for GrammarStart {
    fn from(start: Start) -> Self {
        match start {
            Start::Expr => GrammarStart::Expr,
            Start::Sort => GrammarStart::SortExpr,
            Start::Projected => GrammarStart::ProjectedExpr,
            Start::Column => GrammarStart::ColumnOrPath,
            Start::Field => GrammarStart::DocumentField,
            Start::AddSub => GrammarStart::AddSubExpr,
            Start::MulDiv => GrammarStart::MulDivExpr,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CompileMode {
    Execute,
    Prepare,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Rust debug form of the message
    Debug,
    /// Base64 of the encoded payload
    Base64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        Command::Parse { expr, start, table } => {
            let model = if table {
                DataModel::Table
            } else {
                DataModel::Document
            };
            let parsed = xcrud::parse_with(&expr, start.into(), ParseOptions::new(model))?;
            println!("{}", parsed.expr);
            for (pos, name) in parsed.placeholders.iter().enumerate() {
                println!("  ?{pos} = :{name}");
            }
            if let Some(direction) = parsed.direction {
                println!("  direction: {direction:?}");
            }
            if let Some(alias) = parsed.alias {
                println!("  alias: {alias}");
            }
        }
        Command::Compile { file, mode, format } => {
            let stmt = load_statement(&file)?;
            let message = match mode {
                CompileMode::Execute => xcrud::compile(&stmt, Mode::Execute)?,
                CompileMode::Prepare => {
                    let (message, placeholders) = xcrud::compile_prepared(&stmt)?;
                    log::info!("placeholders: {placeholders:?}");
                    message
                }
            };
            print_message(&ClientMessage::Crud(message), format);
        }
        Command::Plan { file, times } => {
            let stmt = load_statement(&file)?;
            let mut registry = StatementRegistry::new();
            let handle = registry.register();
            for run in 1..=times {
                let plan = registry.decide(handle, &stmt)?;
                let names: Vec<_> = plan.messages().iter().map(ClientMessage::name).collect();
                let id = plan
                    .statement_id()
                    .map_or(String::new(), |id| format!(" (statement {id})"));
                println!("#{run}: {:?}{id}: {}", plan.decision(), names.join(", "));
            }
        }
    }
    Ok(())
}

fn load_statement(file: &Path) -> anyhow::Result<Statement> {
    let text = if file.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        text
    } else {
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    let stmt = Statement::from_json(&text).context("reading statement descriptor")?;
    log::debug!("loaded {} on {}", stmt.kind(), stmt.target.name);
    Ok(stmt)
}

fn print_message(message: &ClientMessage, format: Format) {
    let payload = message.payload();
    println!(
        "{} (type {}, {} bytes)",
        message.name(),
        message.message_type(),
        payload.len()
    );
    match format {
        Format::Debug => println!("{message:#?}"),
        Format::Base64 => println!("{}", BASE64.encode(&payload)),
    }
}
