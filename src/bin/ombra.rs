use std::env;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> ombra_offline::Result<()> {
    init_logging();

    #[cfg(feature = "cli")]
    {
        use ombra_offline::cli::{USAGE, parse_args};

        match parse_args(env::args().skip(1)) {
            Ok(Some(options)) => ombra_offline::cli::run(options).await,
            Ok(None) => {
                eprintln!("{USAGE}");
                Ok(())
            }
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!();
                eprintln!("{USAGE}");
                std::process::exit(2);
            }
        }
    }
    #[cfg(not(feature = "cli"))]
    {
        let _ = env::args();
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
