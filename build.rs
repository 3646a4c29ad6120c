fn main() {
    // Rebuild when the build script changes
    println!("cargo:rerun-if-changed=build.rs");

    // Package, compiler and feature information for `imagesim --version`
    built::write_built_file()
        .expect("Failed to acquire build-time information");
}
