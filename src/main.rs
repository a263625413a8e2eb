pub mod content;
pub mod error;
pub mod handle;
pub mod header;
pub mod message;
pub mod root;
pub mod shm;
pub mod vfs;

use vfs::VolatileVfs;

fn main() {
    env_logger::init();

    if let Err(err) = memqlite_vfs::register("memqlite", VolatileVfs::new(), true) {
        log::error!("failed to register memqlite vfs: {err}");
        std::process::exit(1);
    }

    log::info!("memqlite vfs registered as the default sqlite vfs");
}
