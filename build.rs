use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    // Build timestamp (unix seconds), surfaced by the STATS command.
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=PREFIXKV_BUILD_TIMESTAMP={secs}");
}
