fn main() {
    // Embeds git commit and build metadata into OUT_DIR/built.rs
    if let Err(err) = built::write_built_file() {
        panic!("Failed to acquire build-time information: {err}");
    }
}
