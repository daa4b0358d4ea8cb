mod config;
mod core;
mod interfaces;
mod logging;

use anyhow::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("deepmedical: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut host = "127.0.0.1".to_string();
    let mut port: u16 = 8000;
    let mut debug = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" if i + 1 < args.len() => {
                host = args[i + 1].clone();
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                port = args[i + 1].parse().unwrap_or(8000);
                i += 2;
            }
            "--debug" => {
                debug = true;
                i += 1;
            }
            "serve" => i += 1,
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Usage: deepmedical [serve] [--host HOST] [--port PORT] [--debug]");
                std::process::exit(2);
            }
        }
    }

    logging::init(debug);

    let settings = config::Config::from_env();
    interfaces::web::serve(settings, &host, port).await
}
