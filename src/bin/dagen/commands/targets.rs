//! `dagen targets` command

use anyhow::Result;

use dagen::ops::Mode;

use super::inspect;
use crate::cli::InspectArgs;

pub fn execute(args: InspectArgs, verbose: bool) -> Result<()> {
    let json = args.json;
    let output = inspect(args, Mode::List, verbose)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if output.targets.is_empty() {
        println!("No exported targets");
        return Ok(());
    }

    let width = output.targets.keys().map(String::len).max().unwrap_or(0);
    for (name, info) in &output.targets {
        let mut caps = Vec::new();
        if info.runnable {
            caps.push("run");
        }
        if info.testable {
            caps.push("test");
        }
        if info.report {
            caps.push("report");
        }
        let marker = if info.selected { "*" } else { " " };
        let caps = if caps.is_empty() {
            String::new()
        } else {
            format!(" [{}]", caps.join(", "))
        };
        println!(
            "{} {:<width$}  {}{}",
            marker,
            name,
            info.description,
            caps,
            width = width
        );
    }

    Ok(())
}
