use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=PS4000_SDK_DIR");

    // Only the native driver links against the vendor library
    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }

    // PicoSDK installs its import libraries under <sdk>/lib
    let sdk_root = env::var("PS4000_SDK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_sdk_root());
    let lib_path = sdk_root.join("lib");

    println!("cargo:rustc-link-search=native={}", lib_path.display());
    println!("cargo:rerun-if-changed={}", lib_path.display());

    if !lib_path.exists() {
        println!(
            "cargo:warning=PicoSDK library directory {} not found, set PS4000_SDK_DIR",
            lib_path.display()
        );
    }
}

fn default_sdk_root() -> PathBuf {
    // Build scripts run on the host, so ask cargo for the target OS
    match env::var("CARGO_CFG_TARGET_OS").as_deref() {
        Ok("windows") => PathBuf::from(r"C:\Program Files\Pico Technology\SDK"),
        Ok("macos") => PathBuf::from("/Applications/PicoScope 7 T&M.app/Contents/Resources"),
        _ => PathBuf::from("/opt/picoscope"),
    }
}
