use std::env;

fn main() {
    // Set linking information for C libraries
    if env::var("CARGO_FEATURE_C_BINDINGS").is_ok() {
        println!("cargo:rustc-link-lib=c");

        if let Ok(pkg_config_path) = env::var("PKG_CONFIG_PATH") {
            println!("cargo:rustc-env=PKG_CONFIG_PATH={}", pkg_config_path);
        }
    }

    // Version string shared by the CLI, the HTTP user agent and the C ABI
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    println!("cargo:rustc-env=REELVAULT_VERSION={}", version);

    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
