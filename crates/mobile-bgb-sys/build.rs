use std::{
    env, fs,
    path::{Path, PathBuf},
};

fn main() {
    let bundled = env::var_os("CARGO_FEATURE_BUNDLED").is_some();
    let system = env::var_os("CARGO_FEATURE_SYSTEM").is_some();

    match (bundled, system) {
        (true, true) => panic!("mobile-bgb-sys: enable only one of 'bundled' or 'system'"),
        (true, false) => build_bundled(),
        (false, true) => link_system(),
        // Nothing to link; `mobile-bgb-adapter` reports the adapter as unavailable.
        (false, false) => {}
    }
}

fn link_system() {
    println!("cargo:rerun-if-env-changed=LIBMOBILE_LIB_DIR");
    if let Some(dir) = env::var_os("LIBMOBILE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", PathBuf::from(dir).display());
    }
    println!("cargo:rustc-link-lib=mobile");
}

/// The libmobile checkout: `LIBMOBILE_SRC_DIR`, else `vendor/libmobile-0.2.2`,
/// else `vendor/libmobile` at the workspace root.
fn source_dir() -> Option<PathBuf> {
    println!("cargo:rerun-if-env-changed=LIBMOBILE_SRC_DIR");
    if let Some(src) = env::var_os("LIBMOBILE_SRC_DIR") {
        return Some(PathBuf::from(src));
    }

    let vendor = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR")?).join("../../vendor");
    ["libmobile-0.2.2", "libmobile"]
        .iter()
        .map(|name| vendor.join(name))
        .find(|dir| dir.join("mobile.h").exists())
}

fn build_bundled() {
    let Some(src) = source_dir().filter(|dir| dir.join("mobile.h").exists()) else {
        panic!(
            "mobile-bgb-sys (bundled): no libmobile checkout found. Place libmobile 0.2.2 \
             under vendor/libmobile-0.2.2 or set LIBMOBILE_SRC_DIR."
        );
    };
    println!("cargo:rerun-if-changed={}", src.display());

    let mut files = Vec::new();
    collect_c_files(&src, &mut files);
    if files.is_empty() {
        panic!("mobile-bgb-sys (bundled): no C sources under {}", src.display());
    }
    files.sort();

    if env::var_os("CARGO_CFG_WINDOWS").is_some() {
        println!("cargo:rustc-link-lib=ws2_32");
        println!("cargo:rustc-link-lib=iphlpapi");
    }

    cc::Build::new()
        .include(&src)
        .files(files)
        .warnings(false)
        .compile("mobile");
}

fn collect_c_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for path in entries.flatten().map(|e| e.path()) {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if path.is_dir() {
            // Test and example programs ship their own main().
            if !name.starts_with('.') && !["test", "example", "doc"].iter().any(|s| name.contains(s)) {
                collect_c_files(&path, out);
            }
        } else if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("c")) {
            out.push(path);
        }
    }
}
