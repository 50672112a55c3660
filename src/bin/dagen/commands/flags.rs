//! `dagen flags` command

use anyhow::Result;

use dagen::ops::Mode;

use super::inspect;
use crate::cli::InspectArgs;

pub fn execute(args: InspectArgs, verbose: bool) -> Result<()> {
    let json = args.json;
    let output = inspect(args, Mode::Flags, verbose)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# Configuration {}", output.config_hash);
    for (name, info) in &output.flags {
        println!("{} = {}    # {}", name, info.value, info.ty);
        if !info.description.is_empty() {
            println!("    {}", info.description);
        }
        if !info.allowed_values.is_empty() {
            println!("    allowed: {}", info.allowed_values.join(", "));
        }
    }

    Ok(())
}
