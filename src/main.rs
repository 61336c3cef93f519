use clap::Parser;
use rover_teleop_runtime::config::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    let logs = rover_teleop_runtime::logging::init();

    if let Err(e) = rover_teleop_runtime::runtime::run(args, logs).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
