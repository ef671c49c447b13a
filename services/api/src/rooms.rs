use clap::Args;
use grade_intake::config::AppConfig;
use grade_intake::error::AppError;
use grade_intake::intake::{RoomDirectory, RoomKey, SubmissionStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct OpenRoomsArgs {
    /// Restrict the listing to one grade; all grades are combined otherwise
    #[arg(long)]
    pub(crate) grade: Option<u32>,
    /// Override the directory holding submission records
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
}

pub(crate) async fn run_open_rooms(args: OpenRoomsArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    let store = SubmissionStore::open(config.storage.snapshot_path()).await?;
    let rooms = RoomDirectory::new(Arc::new(store));
    let open = rooms.open_rooms(args.grade).await?;

    print!("{}", render_open_rooms(args.grade, &open));
    Ok(())
}

fn render_open_rooms(grade: Option<u32>, open: &[RoomKey]) -> String {
    let scope = match grade {
        Some(grade) => format!("grade {grade}"),
        None => "all grades".to_string(),
    };

    let mut out = format!("Open rooms ({scope}): {}\n", open.len());
    for room in open {
        out.push_str(&format!(
            "  {room}  bus {} / {} / room {}\n",
            room.bus,
            room.gender.label(),
            room.room_number
        ));
    }
    out
}
