use std::fs;
use std::path::Path;

/// Modules that hold key material or decrypted layers. Anything they emit
/// must go through `tracing`, never straight to stdout/stderr.
const GUARDED_MODULES: [&str; 3] = ["key_management.rs", "relay.rs", "circuit.rs"];

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR missing");
    let src_dir = Path::new(&manifest_dir).join("src");
    for module in GUARDED_MODULES {
        let path = src_dir.join(module);
        println!("cargo:rerun-if-changed={}", path.display());
        if let Ok(contents) = fs::read_to_string(&path) {
            enforce_output_guards(&contents, &path);
        }
    }
}

fn enforce_output_guards(contents: &str, path: &Path) {
    let forbidden = ["println!(", "eprintln!(", "print!(", "eprint!(", "dbg!("];

    for token in forbidden {
        if contents.contains(token) {
            panic!(
                "Forbidden token `{}` in guarded module: {}",
                token,
                path.display()
            );
        }
    }
}
