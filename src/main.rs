use clap::Parser;
use proclet::cli;
use proclet::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    if let Err(e) = init_logging(args.log_level) {
        eprintln!("{e:#}");
    }

    let code = match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            cli::EXIT_FAILED
        }
    };
    // Exit explicitly: a pending stdin read would otherwise hold the runtime open.
    std::process::exit(code);
}
