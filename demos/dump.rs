// An example showing how to dump the contents of a Password Safe database.
//
// Run as: cargo run --example dump -- ~/.pwsafe/pwsafe.psafe3 password

use std::env;

use pwsafedb::{EngineConfig, File, LoadOutcome, ANY_VERSION};

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let filename = &args[1];
    let password = &args[2];

    let outcome = File::load(filename, password.as_bytes(), ANY_VERSION, EngineConfig::default()).unwrap();
    let file = match outcome {
        LoadOutcome::Opened(file) => file,
        LoadOutcome::WrongPassword => {
            eprintln!("wrong passphrase");
            return;
        }
        LoadOutcome::WrongVersion(v) => {
            eprintln!("file is a different known dialect: {v:#x}");
            return;
        }
        LoadOutcome::Unsupported(v) => {
            eprintln!("unsupported or unrecognized format: {v:#x}");
            return;
        }
    };

    println!("format: {:#x}, iterations: {}", file.source_format, file.iterations);
    println!("checksum ok: {}", file.checksum_ok);
    if let Some(name) = file.header_fields.database_name() {
        println!("database name: {name}");
    }

    for id in file.records.iterator() {
        let record = file.records.get(id).unwrap();
        println!("{:?} [{}] {} / {}", record.id, record.group, record.title, record.username);
    }
}
