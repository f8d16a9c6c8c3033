use std::{collections::BTreeMap, env};

// Bakes `.env` values into the binary as fallbacks for variables missing at runtime.
fn main() {
    println!("cargo:rerun-if-changed=.env");

    let mut baked = BTreeMap::new();
    match dotenvy::from_filename_iter(".env") {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok((key, value)) => {
                        baked.insert(key, value);
                    }
                    Err(e) => println!("cargo:warning=Skipping malformed .env entry: {e}"),
                }
            }
        }
        Err(e) => println!("cargo:warning=Failed to load .env file: {e}"),
    }

    for (key, value) in baked {
        // A variable set for the build overrides the file
        let value = env::var(&key).unwrap_or(value);
        println!("cargo:rustc-env={key}={value}");
        println!("cargo::rerun-if-env-changed={key}");
    }
}
