use crate::rooms::{run_open_rooms, OpenRoomsArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use grade_intake::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Grade Intake",
    about = "Collect student submissions and review room assignments for grade events",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect room occupancy from the stored submissions
    Rooms {
        #[command(subcommand)]
        command: RoomsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RoomsCommand {
    /// List room keys that still have free places
    Open(OpenRoomsArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the directory holding submission records and documents
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Rooms {
            command: RoomsCommand::Open(args),
        } => run_open_rooms(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_defaults_to_serve() {
        let cli = Cli::try_parse_from(["grade-intake-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_rooms_open_with_grade() {
        let cli = Cli::try_parse_from(["grade-intake-api", "rooms", "open", "--grade", "6"])
            .expect("parses");
        match cli.command {
            Some(Command::Rooms {
                command: RoomsCommand::Open(args),
            }) => assert_eq!(args.grade, Some(6)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "grade-intake-api",
            "serve",
            "--port",
            "8080",
            "--data-dir",
            "/srv/intake",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(8080));
                assert_eq!(args.data_dir, Some(PathBuf::from("/srv/intake")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
