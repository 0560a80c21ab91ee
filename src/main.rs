use crate::config::PipelineConfig;
use crate::pipeline::PipelineCoordinator;
use crate::pipeline::types::Region;
use crate::servo::ServoController;
use crate::sim::{PresetRoi, Scene, SimBus, SimFrameSource, SimTracker};
use clap::{Arg, ArgAction, Command};
use std::path::Path;
use std::time::Duration;
use std::{panic, process};

pub mod capture;
pub mod config;
pub mod pipeline;
pub mod servo;
pub mod sim;
pub mod tracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new("servotrack")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; omitted fields use defaults.")
                .required(false),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("COUNT")
                .help("Stop after COUNT synthetic frames (0 = run until interrupted).")
                .value_parser(clap::value_parser!(u64))
                .default_value("300"),
        )
        .arg(
            Arg::new("self-test")
                .long("self-test")
                .action(ArgAction::SetTrue)
                .help("Sweep both axes through a scripted exercise and exit."),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => PipelineConfig::load(Path::new(path))?,
        None => PipelineConfig::default(),
    };

    // kill the process as soon as a secondary task panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    if matches.get_flag("self-test") {
        let bus = SimBus::new(
            config.servo.pan.home_units,
            config.servo.tilt.home_units,
        );
        let controller = ServoController::new(bus, config.servo.clone());
        controller.startup().await?;
        controller.self_test().await?;
        controller.safe_state().await;
        return Ok(());
    }

    let frames = *matches.get_one::<u64>("frames").unwrap();

    // Synthetic rig: a drifting target, a scene-reading tracker, and a
    // kinematic bus. Hardware-backed collaborators plug into the same seams.
    let scene = Scene::drifting((700.0, 360.0), (1.5, 0.4));
    let source = Box::new(SimFrameSource::new(
        config.video.width,
        config.video.height,
        frames,
        Duration::from_millis(33),
    ));
    let tracker = Box::new(SimTracker::new(scene));
    let roi = Box::new(PresetRoi::new(Region::new(670.0, 330.0, 60.0, 60.0), 0));
    let bus = SimBus::new(
        config.servo.pan.home_units,
        config.servo.tilt.home_units,
    );

    let mut pipeline = PipelineCoordinator::new(config, source, tracker, roi, bus);

    // gracefully wind down on SIGINT, SIGTERM, or SIGHUP
    let cancel = pipeline.cancellation_token();
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .expect("Error setting Ctrl-C handler");

    pipeline.start();
    if let Err(err) = pipeline.wait_ready().await {
        pipeline.shutdown().await.ok();
        return Err(err.into());
    }

    let result = pipeline.run().await;
    println!("{}", pipeline.health().summary());
    result
}
