use std::fs;
use std::path::Path;

/// Library code reports through `log` and `Result`, never the terminal or process exit.
const FORBIDDEN: [&str; 4] = ["println!(", "eprintln!(", "dbg!(", "std::process::exit"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    let mut offenders = Vec::new();
    scan_sources(Path::new("src"), &mut offenders);
    if !offenders.is_empty() {
        panic!(
            "fdbasis library code must not write to the terminal or exit:\n{}",
            offenders.join("\n")
        );
    }
}

fn scan_sources(dir: &Path, offenders: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.is_dir() {
            scan_sources(&path, offenders);
            continue;
        }
        if path.extension().is_none_or(|ext| ext != "rs") {
            continue;
        }
        let Ok(source) = fs::read_to_string(&path) else {
            continue;
        };
        offenders.extend(source.lines().enumerate().filter_map(|(n, line)| {
            FORBIDDEN
                .iter()
                .find(|token| line.contains(**token))
                .map(|token| format!("  {}:{}: `{token}`", path.display(), n + 1))
        }));
    }
}
