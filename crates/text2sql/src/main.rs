use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod db;
mod eval;
mod generate;
mod logging;
mod util;

#[derive(Parser, Debug)]
#[command(name = "text2sql")]
#[command(about = "Text-to-SQL execution, evaluation and generation utilities.", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (e.g. `info`, `text2sql_eval=debug`). Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Execute one SQL statement and print the execution result as JSON.
    Exec(db::ExecArgs),
    /// Print the CREATE TABLE statements of a SQLite database.
    Schema(db::SchemaArgs),
    /// Score predictions (execution accuracy or VES) and write the score files.
    Eval(eval::EvalArgs),
    /// Generate SQL for a dataset with execution-guided decoding.
    Generate(generate::GenerateArgs),
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref())?;

    match cli.command {
        Command::Exec(args) => db::cmd_exec(args),
        Command::Schema(args) => db::cmd_schema(args),
        Command::Eval(args) => eval::cmd_eval(args),
        Command::Generate(args) => generate::cmd_generate(args),
    }
}
