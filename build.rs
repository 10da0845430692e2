fn main() {
    // ── macOS: embed Info.plist so CoreBluetooth grants Bluetooth access ──────
    //
    // CBCentralManager silently refuses to scan (state stays "unauthorised")
    // unless the running binary carries an Info.plist with
    // NSBluetoothAlwaysUsageDescription. CLI tools get one by placing the
    // plist in the __TEXT,__info_plist section via the linker's -sectcreate.
    //
    // `CARGO_CFG_TARGET_OS` is the *target* OS, so cross-compiling from
    // Linux to macOS is covered too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let dir = std::env::var("CARGO_MANIFEST_DIR")
            .expect("CARGO_MANIFEST_DIR must be set by Cargo");

        let plist = format!("{dir}/Info.plist");

        println!("cargo:rustc-link-arg-bins=-sectcreate");
        println!("cargo:rustc-link-arg-bins=__TEXT");
        println!("cargo:rustc-link-arg-bins=__info_plist");
        println!("cargo:rustc-link-arg-bins={plist}");

        println!("cargo:rerun-if-changed=Info.plist");
    }
}
