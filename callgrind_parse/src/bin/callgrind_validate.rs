use callgrind_parse::CallgrindFile;
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <callgrind.out>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match CallgrindFile::parse(file) {
        Ok(profile) => {
            println!("Valid Callgrind file: {}", path);
            println!("  Events: {}", profile.header.events.join(" "));
            if let Some(summary) = &profile.header.summary {
                let totals: Vec<String> = summary.iter().map(|v| v.to_string()).collect();
                println!("  Summary: {}", totals.join(" "));
            }
            println!("  Functions: {}", profile.functions.len());
            println!("  Calls: {}", profile.call_count());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid Callgrind file '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
