//! Build script for kdctl-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version
//! - Whether the target has a native debugging engine
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer (`std::cell::OnceCell`)
//! - **Windows**: `dbgeng.dll`, linked at build time through `dbgeng.lib`
//! - **Other targets**: build fine, but only the simulated engine is available

fn main()
{
    const MIN_RUST_VERSION: &str = "1.70.0";

    match (rustc_version::version(), rustc_version::Version::parse(MIN_RUST_VERSION)) {
        (Ok(found), Ok(minimum)) => {
            if found < minimum {
                panic!("kdctl-core requires Rust {minimum} or newer, found {found}");
            }
        }
        // If we can't get version (e.g., in some build environments), just warn
        _ => println!("cargo:warning=could not verify Rust version"),
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        println!("cargo:warning=no kernel debugging engine on {target_os}; only the simulated engine is available");
    }
}
