//! `tpo info`: print probed toolchain metadata.

use tpo_compiler::CompilerOptions;

use crate::context;
use crate::{GlobalArgs, InfoArgs};

/// Runs the `tpo info` command.
///
/// Prints a JSON array with one build-info record per platform. Returns 1 if
/// any platform failed to initialize.
pub fn run(args: &InfoArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = context::load(global)?;
    let options = CompilerOptions::from_config(&config);
    let platforms = context::platforms(&config, &args.platforms)?;

    let mut infos = Vec::new();
    let mut code = 0;
    for instance in context::instances(platforms, &options, global) {
        match instance.build_info(false) {
            Ok(info) => infos.push(info),
            Err(e) => {
                eprintln!("error: {e}");
                code = 1;
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&infos)?);
    Ok(code)
}
