mod cli;

use clap::{Args, Parser, Subcommand};

use cy::config::Config;
use cy::server::daemon::CyServer;
use cy::socket;
use cy::telemetry::{self, LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "cy",
    about = "the time-traveling terminal multiplexer",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (commit ", env!("GIT_COMMIT"), ")",
        " built ", env!("BUILD_TIMESTAMP"),
    )
)]
struct Cli {
    #[arg(
        long = "socket-name",
        short = 'L',
        global = true,
        default_value = "default",
        help = "The name of the server socket"
    )]
    socket: String,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "CY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "CY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the cy server, starting one if necessary (the default)
    Connect,
    /// Run code on the cy server
    Exec(ExecArgs),
    /// Run the server in the foreground
    #[command(hide = true)]
    Serve,
}

#[derive(Args, Debug)]
struct ExecArgs {
    #[arg(
        long = "command",
        short = 'c',
        value_name = "CODE",
        help = "Provide code as a string argument"
    )]
    command: Option<String>,

    #[arg(value_name = "FILE", help = "A file containing code, or - for stdin")]
    file: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(err) = telemetry::init(&LogConfig {
        level: args.logging.level,
        file: args.logging.file.clone(),
    }) {
        eprintln!("cy: {}", err);
        std::process::exit(1);
    }

    let result = match args.command {
        None | Some(Command::Connect) => cli::connect_command(&args.socket).await,
        Some(Command::Exec(exec)) => {
            cli::exec_command(&args.socket, exec.command, exec.file).await
        }
        Some(Command::Serve) => serve(&args.socket).await,
    };

    if let Err(err) = result {
        eprintln!("cy: {}", err);
        std::process::exit(1);
    }
}

async fn serve(socket_name: &str) -> anyhow::Result<()> {
    let path = socket::socket_path(socket_name)?;
    let server = CyServer::new(path, Config::from_env());
    server.listen().await?;
    Ok(())
}
