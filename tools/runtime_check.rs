//! Runtime Dependency Check
//!
//! Probes every runtime library the adapter links and prints one
//! `[PASS]`/`[FAIL]` line per library. Exit code 0 only if all pass.

use inference_adapter::runtime_check::run_checks;

fn main() {
    println!("Starting dependency check...");
    println!("inference-adapter {}", env!("CARGO_PKG_VERSION"));

    let results = run_checks();
    for result in &results {
        println!("{}", result);
    }

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.name)
        .collect();

    if failed.is_empty() {
        println!("\nAll runtime libraries available");
    } else {
        println!("\nUnavailable runtime libraries: {}", failed.join(", "));
        std::process::exit(1);
    }
}
