pub mod capture;
pub mod cli;
pub mod device;
pub mod events;
pub mod flow;
pub mod input;
pub mod models;
pub mod recording;
pub mod sensing;
pub mod settings;
pub mod store;
pub mod utils;

use clap::Parser;

pub use device::{BridgeSet, DeviceBridge, DeviceInfo};
pub use events::RecorderEvent;
pub use recording::{RecordingController, RecordingError, StartRequest, StoppedRecording};
pub use settings::RecorderSettings;

pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    utils::init_logging();

    log::info!("flowcap starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::execute(cli))
}
