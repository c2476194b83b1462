//! Throughput benchmark: parse-and-validate a directory file (or a bare
//! server descriptor file) repeatedly and report time per document.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::time::Instant;

use mixdesc::directory::Directory;
use mixdesc::ServerDescriptor;

fn benchmark_directory(filename: &str) {
    let data = fs::read_to_string(filename).unwrap_or_else(|e| panic!("{e}"));

    let start = Instant::now();
    let mut count = 0usize;
    let mut servers = 0usize;
    let validated = HashSet::new();
    match Directory::parse(&data, &validated) {
        Ok(dir) => {
            count += 1;
            servers += dir.all_servers().len();
        }
        Err(_) => {
            if let Ok(sd) = ServerDescriptor::parse(&data, false, &validated) {
                count += 1;
                servers += 1;
                let _ = sd;
            }
        }
    }
    let elapsed = start.elapsed();

    println!("Finished benchmark_directory({filename})");
    println!("  Total time: {:.3}ms", elapsed.as_secs_f64() * 1000.0);
    println!("  Parsed documents: {count}");
    println!("  Embedded server descriptors: {servers}");
}

fn main() {
    let mut args: Vec<_> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: benchmark <directory-or-descriptor-file>");
        std::process::exit(1);
    }
    let filename = args.remove(1);
    benchmark_directory(&filename);
}
