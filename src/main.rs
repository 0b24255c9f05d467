//! memsim - Main Entry Point
//!
//! Usage: memsim [OPTIONS] [LAYOUT_FILE]
//!
//! Loads a layout file describing the processes and their base/limit,
//! segmentation and paging tables, prints the tables, then translates
//! logical addresses for every process under every scheme. Each report is
//! printed and appended to the results file.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;

use memsim::io::{
    describe_layout, load_layout, output_path_for, parse_address, render_query, ReportWriter,
};
use memsim::translation::{translate_all, LogicalAddress, Scheme};
use memsim::MemoryLayout;

/// Translate logical addresses under base/limit, segmentation and paging
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Config {
    /// Layout file with the process tables (asked for on stdin if omitted)
    #[clap(value_parser)]
    layout: Option<PathBuf>,

    /// Results file, defaults to output_<layout file name>
    #[clap(short, long, value_parser)]
    output: Option<PathBuf>,

    /// Translate this address and exit, e.g. 306 or 2,46 (repeatable)
    #[clap(short = 'a', long = "address", value_parser)]
    addresses: Vec<String>,

    /// Do not print the loaded tables
    #[clap(short, long)]
    quiet: bool,

    /// Print diagnostics to stderr
    #[clap(short, long)]
    verbose: bool,
}

fn main() {
    let config = Config::parse();

    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main logic separated from main() for cleaner error handling
fn run(config: &Config) -> Result<(), String> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    // Step 1: Find and load the layout file
    let layout_path = match &config.layout {
        Some(path) => path.clone(),
        None => {
            print!("No layout file given. Enter the layout file name: ");
            flush_stdout()?;
            match read_line(&mut input)? {
                Some(line) if !line.trim().is_empty() => PathBuf::from(line.trim()),
                _ => return Err("No layout file given".to_string()),
            }
        }
    };

    let layout = load_layout(&layout_path)
        .map_err(|e| format!("{}: {}", layout_path.display(), e))?;

    let output_path = config
        .output
        .clone()
        .unwrap_or_else(|| output_path_for(&layout_path));

    if config.verbose {
        eprintln!("=== memsim ===");
        eprintln!("Layout file: {}", layout_path.display());
        eprintln!("Output file: {}", output_path.display());
        eprintln!("Processes:   {}", layout.num_processes());
        eprintln!("Page size:   {}", layout.page_size());
        eprintln!("Paging:      {}", layout.paging_mode());
        eprintln!("SDT entries: {}", layout.segment_table().len());
        eprintln!();
    }

    // Step 2: Show what was loaded
    if !config.quiet {
        println!("{}", describe_layout(&layout_path.display().to_string(), &layout));
    }

    // Step 3: Open the results file
    let mut report = ReportWriter::create(&output_path)
        .map_err(|e| format!("Failed to open output file {}: {}", output_path.display(), e))?;

    // Step 4: Translate
    if config.addresses.is_empty() {
        interactive(&layout, &mut report, &mut input, config.verbose)?;
    } else {
        for raw in &config.addresses {
            let address = parse_address(raw).map_err(|e| e.to_string())?;
            run_query(&layout, address, &mut report, config.verbose)?;
        }
    }

    if config.verbose {
        eprintln!("Results written to: {}", report.path().display());
    }

    Ok(())
}

/// Translate one address for every process and record the report
fn run_query(
    layout: &MemoryLayout,
    address: LogicalAddress,
    report: &mut ReportWriter,
    verbose: bool,
) -> Result<(), String> {
    let results = translate_all(layout, address);
    let text = render_query(layout, address, &results);

    print!("{}", text);
    report
        .append(&text)
        .map_err(|e| format!("Failed to write output file: {}", e))?;

    if verbose {
        let successes: usize = results.iter().map(|r| r.successes()).sum();
        let failures = results.len() * Scheme::ALL.len() - successes;
        eprintln!(
            "Address {}: {} successful translations, {} failed",
            address, successes, failures
        );
    }

    Ok(())
}

fn interactive(
    layout: &MemoryLayout,
    report: &mut ReportWriter,
    input: &mut impl BufRead,
    verbose: bool,
) -> Result<(), String> {
    loop {
        println!("Translate a logical address to a physical address.\n");
        println!("Choose an option:");
        println!("\t1.- Enter a single value (e.g. 306)");
        println!("\t2.- Enter a pair of values (e.g. (2,46))\n");
        println!("\t0.- Exit\n");
        flush_stdout()?;

        let Some(choice) = read_line(input)? else {
            return Ok(());
        };

        let want_pair = match choice.trim() {
            "0" => return Ok(()),
            "1" => false,
            "2" => true,
            _ => {
                println!("Invalid option\n");
                continue;
            }
        };

        match prompt_address(input, want_pair)? {
            Some(address) => run_query(layout, address, report, verbose)?,
            None => return Ok(()),
        }
    }
}

/// Ask for an address of the chosen shape until the user confirms one.
/// Returns `None` on end of input.
fn prompt_address(input: &mut impl BufRead, want_pair: bool) -> Result<Option<LogicalAddress>, String> {
    loop {
        if want_pair {
            print!("Enter the logical address (two integers separated by a comma): ");
        } else {
            print!("Enter the logical address (single integer): ");
        }
        flush_stdout()?;

        let Some(line) = read_line(input)? else {
            return Ok(None);
        };

        let address = match parse_address(&line) {
            Ok(address) => address,
            Err(e) => {
                println!("{}\n", e);
                continue;
            }
        };
        if want_pair != matches!(address, LogicalAddress::Pair(..)) {
            println!("'{}' is not in the chosen format\n", line.trim());
            continue;
        }

        print!("Logical address entered: {}\n\nIs this correct? (y/n) ", address);
        flush_stdout()?;
        match read_line(input)? {
            Some(answer) if answer.trim().eq_ignore_ascii_case("y") => return Ok(Some(address)),
            Some(_) => continue,
            None => return Ok(None),
        }
    }
}

/// Read one line, `None` at end of input
fn read_line(input: &mut impl BufRead) -> Result<Option<String>, String> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .map_err(|e| format!("Failed to read input: {}", e))?;
    Ok(if read == 0 { None } else { Some(line) })
}

fn flush_stdout() -> Result<(), String> {
    io::stdout()
        .flush()
        .map_err(|e| format!("Failed to write to stdout: {}", e))
}
