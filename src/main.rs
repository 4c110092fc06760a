//! AppHost demo
//!
//! Hosts a scripted program on the headless platform: it opens a main
//! window, a splash screen, a dialog and a tool window, then waits to be
//! closed. The host resizes its container and asks the program to close.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apphost::host::{Container, ProgramDomain, WindowStyle, WindowStyleEx};
use apphost::platform::{HeadlessPlatform, WindowSpec};
use apphost::shared::{Rect, Size};
use apphost::{AppHost, HostConfig};

const ENTRY: &str = "demo/notepad.exe";

/// The hosted program: a tiny message loop over headless windows
fn scripted_program(platform: Arc<HeadlessPlatform>) -> Result<()> {
    let main = platform.create_window(
        WindowSpec::new(WindowStyle::overlapped_window(), WindowStyleEx::APP_WINDOW).bounds(Rect::new(80, 60, 640, 480)),
    );
    let splash = platform.create_window(
        WindowSpec::new(WindowStyle::POPUP, WindowStyleEx::APP_WINDOW).bounds(Rect::new(0, 0, 320, 160)),
    );
    let dialog = platform.create_window(
        WindowSpec::new(WindowStyle::CAPTION | WindowStyle::SYSTEM_MENU, WindowStyleEx::DLG_MODAL_FRAME)
            .bounds(Rect::new(100, 100, 300, 200)),
    );
    let tool = platform.create_window(
        WindowSpec::new(WindowStyle::popup_window(), WindowStyleEx::TOOL_WINDOW).bounds(Rect::new(0, 0, 120, 300)),
    );

    platform.show_window(splash)?;
    platform.show_window(main)?;
    platform.destroy_window(splash)?;
    platform.show_window(dialog)?;
    platform.show_window(tool)?;

    while platform.exists(main) {
        platform.pump_wait(Duration::from_millis(20));
    }

    // Main window gone: tear down whatever is left and exit
    for window in [dialog, tool] {
        if platform.exists(window) {
            platform.destroy_window(window)?;
        }
    }
    Ok(())
}

fn parse_config_arg() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            let path = args.next().context("--config requires a path")?;
            return Ok(Some(PathBuf::from(path)));
        }
        bail!("Unknown argument: {}", arg);
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "apphost=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AppHost demo");

    let config = match parse_config_arg()? {
        Some(path) => HostConfig::load_from(&path)?,
        None => HostConfig::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {:#}", e);
            HostConfig::default()
        }),
    };

    let platform = Arc::new(HeadlessPlatform::new());
    let domain = Arc::new(ProgramDomain::new());
    {
        let platform = platform.clone();
        domain.register(ENTRY, move || scripted_program(platform.clone()));
    }

    let container = platform.create_window(WindowSpec::container(Size::new(800, 600)));
    let mut host = AppHost::new(platform.clone(), domain, Container::new(container, Size::new(800, 600)))
        .with_config(config);
    host.on_application_closed(|outcome| info!("Hosted application closed: {:?}", outcome));

    host.start(ENTRY)?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    host.resize_container(Size::new(1024, 768));

    tokio::time::sleep(Duration::from_millis(200)).await;
    host.close();

    let outcome = tokio::time::timeout(Duration::from_secs(5), host.wait_for_exit())
        .await
        .context("Hosted application did not exit")?;

    info!(
        "Host {:?}, outcome {:?}, {} close request(s) posted",
        host.state(),
        outcome,
        platform.close_requests().len()
    );
    Ok(())
}
