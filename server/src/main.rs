use clap::Parser;
use log::info;
use server::network::Server;
use server::questions;

/// Main-method of the application.
/// Parses command-line arguments, then runs the quiz server until shutdown.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
    }

    env_logger::init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let question_bank = questions::default_question_bank();
    info!("Loaded question bank with {} questions", question_bank.len());

    let mut server = Server::new(&address, question_bank).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
        }
    }

    Ok(())
}
