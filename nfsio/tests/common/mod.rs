#![allow(dead_code)]

use nfsio::{MemoryClient, MemoryServer, MountContext, MountOptions};

pub const SERVER: &str = "filer";
pub const EXPORT: &str = "/export";
pub const EXPORT_URL: &str = "nfs://filer/export";

/// Server with one export holding a small tree:
///
/// ```text
/// /hello.txt      "hello"
/// /digits.bin     "0123456789"
/// /letters/{a,b,c}
/// /link -> /hello.txt
/// ```
pub fn seeded_server() -> MemoryServer {
    let server = MemoryServer::new();
    server.add_export(SERVER, EXPORT);
    server.seed_file(SERVER, EXPORT, "/hello.txt", "hello").expect("Failed to seed file");
    server.seed_file(SERVER, EXPORT, "/digits.bin", "0123456789").expect("Failed to seed file");
    for name in ["a", "b", "c"] {
        server
            .seed_file(SERVER, EXPORT, &format!("/letters/{}", name), name)
            .expect("Failed to seed directory entry");
    }
    server.seed_symlink(SERVER, EXPORT, "/link", "/hello.txt").expect("Failed to seed symlink");
    server
}

/// Mount the seeded export with default options
pub fn mount(server: &MemoryServer) -> MountContext<MemoryClient> {
    MountContext::new(server, EXPORT_URL).expect("Failed to mount test export")
}

pub fn mount_with(server: &MemoryServer, options: MountOptions) -> MountContext<MemoryClient> {
    MountContext::with_options(server, EXPORT_URL, options).expect("Failed to mount test export")
}

/// Full URL of a file inside the test export
pub fn file_url(path: &str) -> String {
    format!("{}/{}", EXPORT_URL, path.trim_start_matches('/'))
}

pub fn contents(server: &MemoryServer, path: &str) -> Vec<u8> {
    server.file_contents(SERVER, EXPORT, path).expect("Failed to read file contents")
}

/// Setup test logging
pub fn setup_test_logging() {
    nfsio_common::logging::init_test_logging();
}
