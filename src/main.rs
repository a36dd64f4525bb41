// src/main.rs

use conrun::{cli, logging, run, shutdown};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("conrun error: {err}");
            1
        }
    };
    std::process::exit(code);
}

async fn run_main() -> conrun::errors::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level).map_err(conrun::errors::ConrunError::Other)?;
    shutdown::install_panic_hook();
    run(args).await
}
