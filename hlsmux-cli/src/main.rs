use clap::Parser;
use hlsmux::cli::Args;
use hlsmux::{commands, logging};
use mimalloc::MiMalloc;
use tracing::{debug, error};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();

    let log_guard = match logging::init_logging(args.verbose, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let code = match commands::run(args).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Application error: {e}");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    // Flush the file writer before exiting.
    drop(log_guard);
    if code != 0 {
        std::process::exit(code);
    }
}
