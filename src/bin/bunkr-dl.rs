//! bunkr-dl CLI - command-line downloader for albums and single files.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = bunkr_dl::cli::run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI support not compiled in");
    std::process::exit(1);
}
