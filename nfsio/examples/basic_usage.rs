//! Basic usage example for the nfsio library
//!
//! This example demonstrates how to:
//! - Mount an export and run path operations
//! - Open, write, seek and read files through a mount context
//! - Open a file directly from its URL
//! - Handle errors and cleanup

use nfsio::{MemoryServer, MountContext, NfsConfig, Whence};
use nfsio_common::load_default_config;
use nfsio_common::logging::init_logging;
use tracing::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config: NfsConfig = load_default_config()?;
    init_logging(&config.logging);

    // An in-process server stands in for a real NFS filer
    let server = MemoryServer::new();
    server.add_export("filer", "/export");
    server.seed_file("filer", "/export", "/readme.txt", "Welcome to the export\n")?;

    let ctx = MountContext::with_options(&server, "nfs://filer/export", config.mount.clone())?;
    info!("Mounted {:?}:{:?}", ctx.server(), ctx.export());

    ctx.mkdir("/reports")?;
    {
        let mut fh = ctx.open("/reports/q1.txt", "w+", None)?;
        fh.write("revenue: 42\n")?;
        fh.write("costs: 17\n")?;
        fh.flush()?;

        fh.seek(0, Whence::Start)?;
        let text = fh.read(None)?;
        info!("Read back {} bytes from {}", text.len(), fh.name());
    }

    for name in ctx.listdir("/reports")? {
        let st = ctx.stat(&format!("/reports/{}", name))?;
        info!("{:>8} {:o} {}", st.size, st.permissions(), name);
    }

    // Direct open: the handle owns its own session
    let mut fh = nfsio::open(&server, "nfs://filer/export/readme.txt", "r", None)?;
    if let Some(text) = fh.read(None)?.as_text() {
        print!("{}", text);
    }
    fh.close();

    match ctx.open("/missing.txt", "r", None) {
        Ok(_) => info!("Unexpectedly opened a missing file"),
        Err(e) => error!("Expected failure: {} ({:?})", e, ctx.error()),
    }

    Ok(())
}
