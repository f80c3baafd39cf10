use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("patchwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: patchwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("PATCHWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("PATCHWIRE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("default_boundary: {}", patchwire_frame::DEFAULT_BOUNDARY);
    println!("max_part_size: {}", patchwire_frame::DEFAULT_MAX_PART_SIZE);

    Ok(SUCCESS)
}
