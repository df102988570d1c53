use std::collections::BTreeMap;
use std::time::Duration;

use atem_link::network::resolve_device;
use atem_link::protocol::TallyBySource;
use atem_link::{Command, CommandSink, Config, Session, SessionState};
use tracing::{info, Level};

/// Prints program/preview changes and input names as they arrive
#[derive(Default)]
struct TallyMonitor {
    names: BTreeMap<u16, String>,
    program: Option<u16>,
    preview: Option<u16>,
}

impl TallyMonitor {
    fn name(&self, source: u16) -> String {
        self.names
            .get(&source)
            .cloned()
            .unwrap_or_else(|| format!("#{}", source))
    }

    fn print_tally(&self, tally: &TallyBySource) {
        let on_air: Vec<String> = tally
            .sources()
            .filter(|&s| tally.is_on_program(s))
            .map(|s| self.name(s))
            .collect();
        println!("on air: {}", on_air.join(", "));
    }
}

impl CommandSink for TallyMonitor {
    fn apply(&mut self, command: &Command) {
        match command {
            Command::ProductName(pin) => println!("device: {}", pin.name),
            Command::FirmwareVersion(ver) => println!("protocol version: {}", ver),
            Command::InputProperties(input) => {
                self.names.insert(input.video_source, input.long_name.text());
            }
            Command::ProgramInput(prg) if self.program != Some(prg.video_source) => {
                self.program = Some(prg.video_source);
                println!("program: {}", self.name(prg.video_source));
            }
            Command::PreviewInput(prv) if self.preview != Some(prv.video_source) => {
                self.preview = Some(prv.video_source);
                println!("preview: {}", self.name(prv.video_source));
            }
            Command::TallyBySource(tally) => self.print_tally(tally),
            _ => {}
        }
    }

    fn on_state_change(&mut self, from: SessionState, to: SessionState) {
        info!(%from, %to, "session state");
    }
}

#[tokio::main]
async fn main() -> atem_link::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.10.240".to_string());
    let device = resolve_device(&host).await?;

    let config = Config {
        working_timeout: Duration::from_secs(2),
        ..Config::default()
    };
    let mut session = Session::with_config(device, config, TallyMonitor::default())?;

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    println!("watching {} (ctrl-c to quit)", device);
    session.run().await;
    Ok(())
}
