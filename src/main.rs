use std::env::args;
use std::fs;
use std::process::ExitCode;

use wisp::sql::script::split_statements;
use wisp::Engine;

fn main() -> ExitCode {
    let mut argv = args().skip(1);
    let (Some(db_path), Some(script_path)) = (argv.next(), argv.next()) else {
        eprintln!("usage: wisp <database-file> <script-file>");
        return ExitCode::FAILURE;
    };

    let engine = match Engine::open(&db_path) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error opening {db_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(&script_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error reading {script_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    for statement in split_statements(&source) {
        if let Err(e) = run_statement(&engine, &statement) {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn run_statement(engine: &Engine, statement: &str) -> Result<(), wisp::DbError> {
    let trimmed = statement.trim_start();
    let is_select = trimmed.len() >= 6 && trimmed[..6].eq_ignore_ascii_case("select");

    if is_select {
        let mut result = engine.query(statement)?;
        while let Some(row) = result.next_row()? {
            let rendered: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
            println!("{}", rendered.join(" | "));
        }
    } else {
        let count = engine.exec(statement)?;
        println!("-- {count} row(s) affected");
    }
    Ok(())
}
