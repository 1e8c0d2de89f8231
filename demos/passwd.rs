// An example showing how to change the master passphrase of a database.
//
// Run as: cargo run --example passwd -- ./tests/fixtures/pwsafe.psafe3 oldpass newpass

use std::env;

use pwsafedb::{EngineConfig, File, LoadOutcome, ANY_VERSION};

fn main() {
    let args: Vec<String> = env::args().collect();
    let filename = &args[1];
    let old_password = &args[2];
    let new_password = &args[3];

    let outcome = File::load(filename, old_password.as_bytes(), ANY_VERSION, EngineConfig::default()).unwrap();
    let mut file = match outcome {
        LoadOutcome::Opened(file) => file,
        _ => {
            eprintln!("could not open {filename} with the given passphrase");
            return;
        }
    };

    file.save(filename, new_password.as_bytes()).unwrap();
    println!("passphrase changed for {filename}");
}
