#![cfg(not(tarpaulin_include))]

use sheetsync::config::Config;
use sheetsync::formula::FormulaEngine;
use sheetsync::reference::{Extent, Reference, column_letters_to_number, parse_reference};
use sheetsync::spreadsheet::Spreadsheet;
use std::env;
use std::io::{self, Write};
use std::time::Instant;

const VIEW: u32 = 10;

#[derive(Debug, PartialEq)]
enum Command {
    Quit,
    Help,
    Show,
    Payload,
    Scroll(char),
    ScrollTo(Reference),
    Output(bool),
    ClearRow(u32),
    ClearColumn(u32),
    Set(Reference, String),
}

impl Command {
    fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        let (head, rest) = match line.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match (head, rest) {
            ("q", "") => Some(Command::Quit),
            ("help", "") => Some(Command::Help),
            ("show", "") => Some(Command::Show),
            ("payload", "") => Some(Command::Payload),
            ("w" | "a" | "s" | "d", "") => head.chars().next().map(Command::Scroll),
            ("enable_output", "") => Some(Command::Output(true)),
            ("disable_output", "") => Some(Command::Output(false)),
            ("scroll_to", cell) => parse_reference(cell).ok().map(Command::ScrollTo),
            ("clear_row", row) => row.parse::<u32>().ok().filter(|r| *r > 0).map(Command::ClearRow),
            ("clear_col", col) => column_letters_to_number(col).ok().map(Command::ClearColumn),
            (cell, term) if cell.starts_with('$') => parse_reference(cell)
                .ok()
                .map(|reference| Command::Set(reference, term.to_string())),
            _ => None,
        }
    }
}

/// Moves the window origin one page, staying inside `extent`.
fn scroll(origin: Reference, direction: char, extent: Extent) -> Reference {
    let mut origin = origin;
    match direction {
        'w' => origin.row = origin.row.saturating_sub(VIEW).max(1),
        'a' => origin.column = origin.column.saturating_sub(VIEW).max(1),
        's' => {
            if let Some(row) = origin.row.checked_add(VIEW).filter(|r| *r <= extent.rows) {
                origin.row = row;
            }
        }
        'd' => {
            if let Some(column) = origin.column.checked_add(VIEW).filter(|c| *c <= extent.cols) {
                origin.column = column;
            }
        }
        _ => {}
    }
    origin
}

fn print_help() {
    println!("Commands:");
    println!("  <ref> <term>: Set a cell, e.g. $A1 =SUM($B1:$B3); an empty term clears it");
    println!("  show: Print the visible window");
    println!("  payload: Print the sheet as payload text");
    println!("  clear_row <n>, clear_col <letters>: Clear a row or column");
    println!("  w/a/s/d: Scroll the window");
    println!("  scroll_to <ref>: Move the window to a cell");
    println!("  enable_output, disable_output: Toggle printing after each command");
    println!("  q: Quit");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default().with_args(env::args().skip(1));
    let engine = FormulaEngine::new();
    let mut sheet = Spreadsheet::new(config.default_extent());
    let mut origin = Reference::new(1, 1);
    let mut show = true;
    let mut status = String::from("ok");
    let mut start_time = Instant::now();

    loop {
        if show {
            let evaluation = sheet.evaluate_all(&engine);
            print!("{}", sheet.render(&evaluation, origin, VIEW, VIEW));
        }

        print!("[{:.1}] ({}) > ", start_time.elapsed().as_secs_f64(), status);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        start_time = Instant::now();

        let Some(command) = Command::parse(&line) else {
            status = String::from("invalid command");
            continue;
        };
        status = String::from("ok");

        match command {
            Command::Quit => break,
            Command::Help => print_help(),
            Command::Show => {
                let evaluation = sheet.evaluate_all(&engine);
                print!("{}", sheet.render(&evaluation, origin, VIEW, VIEW));
            }
            Command::Payload => print!("{}", sheet.payload()),
            Command::Scroll(direction) => origin = scroll(origin, direction, sheet.extent()),
            Command::ScrollTo(reference) => {
                if sheet.extent().contains(&reference) {
                    origin = reference;
                } else {
                    status = String::from("out of range");
                }
            }
            Command::Output(enabled) => show = enabled,
            Command::ClearRow(row) => print!("{}", sheet.clear_row(row)),
            Command::ClearColumn(column) => print!("{}", sheet.clear_column(column)),
            Command::Set(reference, term) => {
                sheet.set(reference, term);
                if let Some(Err(e)) = sheet.evaluate_all(&engine).get(&reference) {
                    status = e.to_string();
                }
            }
        }
    }

    Ok(())
}
