use framebridge_frame::SUPPORTED_VERSIONS;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("framebridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let protocols: Vec<String> = SUPPORTED_VERSIONS.iter().map(ToString::to_string).collect();

    println!("name: framebridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("FRAMEBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("FRAMEBRIDGE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: peer={}, loopback={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "loopback")
    );
    println!("protocol_versions: {}", protocols.join(", "));

    Ok(SUCCESS)
}
