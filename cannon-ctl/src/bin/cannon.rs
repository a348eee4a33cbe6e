use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use cannon_ctl::{
    calibration::CalibrationStore,
    detector::{Detector, Strategy},
    network::TURRET_PORT,
    server::{LaunchError, Server},
    session::Rig,
    sim::{Scene, SimCamera, SimHardware, SimStrategy},
    turret::Turret,
};
use clap::Parser;
use log::{error, info};
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(about = "Turret control server")]
struct CannonArgs {
    /// Port to listen on for the operator client
    #[arg(short, long, default_value_t = TURRET_PORT)]
    port: u16,
    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,
    /// Calibration offsets file
    #[arg(short, long, default_value = "Correct.ini")]
    calibration: PathBuf,
    /// Targets placed on the simulated range
    #[arg(short, long, default_value_t = 4)]
    targets: usize,
}

async fn launch(args: CannonArgs) -> Result<(), LaunchError> {
    let store = CalibrationStore::new(&args.calibration);
    let settings = store.load()?;

    let scene = Scene::random(args.targets);
    info!("Simulated range with targets {:?}", scene.targets());
    let turret = Turret::new(
        Box::new(SimHardware::new(scene.clone())),
        settings.calibration,
        settings.strategy,
    );
    let detector = Detector::new(
        settings.strategy,
        Box::new(SimStrategy::new(scene.clone(), Strategy::TemplateMatch)),
        Box::new(SimStrategy::new(scene.clone(), Strategy::NeuralNet)),
    );
    let rig = Rig {
        turret: Arc::new(Mutex::new(turret)),
        detector: Arc::new(Mutex::new(detector)),
        camera: Arc::new(SimCamera::new(scene)),
        store,
    };

    let server = Server::bind(SocketAddr::new(args.bind, args.port), rig).await?;
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not wait for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let args = CannonArgs::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Could not build tokio runtime");
    match runtime.block_on(launch(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
