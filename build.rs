//! Build script for branchwatch.
//!
//! Ensures the crate recompiles when migration files change, which the
//! `SQLx` `migrate!()` macro needs to pick up schema updates.

fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
