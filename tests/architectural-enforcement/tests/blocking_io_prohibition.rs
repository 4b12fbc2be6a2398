//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Library code talks to sockets only through `tokio::net`.
//! `std::net` address types are fine; its sockets are not. Configuration
//! files are read synchronously before any socket exists, so `config.rs` may
//! use `std::fs`.
//!
//! Library code also propagates errors instead of panicking, so `unwrap()`
//! and `expect()` are confined to tests.

use std::path::Path;

use architectural_enforcement::{report, scan, workspace_dir};

const BLOCKING_SOCKETS: &[&str] = &[
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::net::UdpSocket",
    "net::{TcpStream",
    "net::{TcpListener",
];

#[test]
fn test_no_blocking_sockets_in_library() {
    let violations = scan(&workspace_dir("stance/core/src"), |_, code| {
        code.contains("std::")
            && BLOCKING_SOCKETS.iter().any(|pattern| code.contains(pattern))
    });
    report("blocking std::net sockets in library code", &violations);
}

#[test]
fn test_file_io_confined_to_config() {
    let violations = scan(&workspace_dir("stance/core/src"), |path: &Path, code| {
        code.contains("std::fs") && path.file_name().and_then(|n| n.to_str()) != Some("config.rs")
    });
    report("blocking file I/O outside configuration loading", &violations);
}

#[test]
fn test_no_unwrap_in_library() {
    let violations = scan(&workspace_dir("stance/core/src"), |_, code| {
        code.contains(".unwrap()") || code.contains(".expect(")
    });
    report("unwrap()/expect() in library code", &violations);
}
