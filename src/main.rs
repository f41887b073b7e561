use std::process;

use tracing::error;

use floodgate::{init_runtime, init_settings, init_tracing, run_servers};

fn main() {
    let conf = match init_settings() {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("floodgate: {}", e);
            process::exit(2);
        },
    };
    init_tracing(conf);

    let tokio = match init_runtime(conf) {
        Ok(tokio) => tokio,
        Err(e) => {
            eprintln!("floodgate: could not create tokio runtime: {}", e);
            process::exit(2);
        },
    };

    if let Err(e) = run_servers(conf, &tokio) {
        error!(%e, "floodgate exited with error");
        eprintln!("floodgate: {}", e);
        process::exit(1);
    }
}
