mod command_line;
#[cfg(windows)]
mod viewer;
#[cfg(windows)]
mod window;

use command_line::ViewerCommandLine;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();

    let command_line = ViewerCommandLine::parse(std::env::args().skip(1))?;
    info!("Starting with {:?}", command_line);
    run(command_line)
}

#[cfg(windows)]
fn run(command_line: ViewerCommandLine) -> eyre::Result<()> {
    viewer::run(command_line)
}

#[cfg(not(windows))]
fn run(_command_line: ViewerCommandLine) -> eyre::Result<()> {
    eyre::bail!("the viewer requires Windows and Direct3D 12")
}
