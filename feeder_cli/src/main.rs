//! Feed dispenser CLI: drives the feeding engine from a polling loop.

mod cli;
mod rt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::Sender;
use eyre::{Result, WrapErr};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use cli::{Cli, Commands, FILE_GUARD};
use feeder_core::{
    Feeder, FeedingCfg, FeedingEngineBuilder, FeedingOutcome, FeedingResult, FeedingTrigger,
};

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let (config, used_defaults) = load_config(&args.config)?;
    init_tracing(&args, &config.logging);
    if used_defaults {
        tracing::warn!(path = %args.config.display(), "config file not found; using defaults");
    }

    match &args.cmd {
        Commands::SelfCheck => self_check(&args, &config),
        Commands::Manual {
            timeout_ms,
            rt,
            rt_prio,
        } => run_feed(
            &args,
            &config,
            FeedingTrigger::Manual,
            0.0,
            *timeout_ms,
            *rt,
            *rt_prio,
        ),
        Commands::Schedule {
            kg,
            timeout_ms,
            rt,
            rt_prio,
        } => run_feed(
            &args,
            &config,
            FeedingTrigger::Schedule,
            *kg,
            *timeout_ms,
            *rt,
            *rt_prio,
        ),
    }
}

fn load_config(path: &Path) -> Result<(feeder_config::Config, bool)> {
    if !path.exists() {
        return Ok((feeder_config::Config::default(), true));
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let config = feeder_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    config
        .validate()
        .wrap_err_with(|| format!("validate config {}", path.display()))?;
    Ok((config, false))
}

fn init_tracing(args: &Cli, logging: &feeder_config::Logging) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(filter.boxed());
    if args.json {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = path
            .file_name()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "feeder.log".into());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();
}

#[allow(clippy::too_many_arguments)]
fn run_feed(
    args: &Cli,
    config: &feeder_config::Config,
    trigger: FeedingTrigger,
    kg: f32,
    timeout_override: Option<u64>,
    rt: bool,
    rt_prio: Option<i32>,
) -> Result<()> {
    rt::setup_rt_once(rt, rt_prio);

    let mut feeding = FeedingCfg::from(config);
    if let Some(ms) = timeout_override {
        feeding.feeding_timeout_ms = ms;
    }

    let (tx, rx) = crossbeam_channel::bounded::<FeedingOutcome>(1);
    let mut engine = build_feeder(args, config, feeding, tx)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .wrap_err("install ctrl-c handler")?;
    }

    if !engine.start_feeding(trigger, kg) {
        let result = engine.last_result();
        emit_rejection(args.json, trigger, result);
        return Err(eyre::eyre!("feeding rejected: {result:?}"));
    }

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let mut abort_sent = false;
    let outcome = loop {
        if shutdown.load(Ordering::SeqCst) && !abort_sent {
            tracing::warn!("abort requested, stopping feed");
            engine.stop_feeding(FeedingResult::Error);
            abort_sent = true;
        }
        engine.update();
        if let Ok(outcome) = rx.try_recv() {
            break outcome;
        }
        std::thread::sleep(tick);
    };

    emit_outcome(args.json, &outcome);
    if outcome.result == FeedingResult::Success {
        Ok(())
    } else {
        Err(eyre::eyre!("feeding finished with {:?}", outcome.result))
    }
}

#[cfg(not(feature = "hardware"))]
fn build_feeder(
    args: &Cli,
    _config: &feeder_config::Config,
    feeding: FeedingCfg,
    tx: Sender<FeedingOutcome>,
) -> Result<Feeder> {
    let hopper = feeder_hardware::SimHopper::new(args.sim_initial_kg, args.sim_flow_kg_s);
    tracing::info!(
        initial_kg = args.sim_initial_kg,
        flow_kg_s = args.sim_flow_kg_s,
        "using simulated hopper"
    );
    FeedingEngineBuilder::new()
        .with_weight_sensor(hopper.sensor())
        .with_relay(hopper.relay())
        .with_config(feeding)
        .with_completion_hook(move |o| {
            let _ = tx.try_send(o);
        })
        .build()
}

#[cfg(feature = "hardware")]
fn build_feeder(
    args: &Cli,
    config: &feeder_config::Config,
    feeding: FeedingCfg,
    tx: Sender<FeedingOutcome>,
) -> Result<Feeder> {
    use feeder_hardware::{GpioRelay, HardwareWeightSensor};

    let pins = config
        .pins
        .ok_or_else(|| eyre::eyre!("config [pins] section is required for hardware builds"))?;
    let cal = load_scale_cal(args, config)?;
    let sensor = HardwareWeightSensor::new(
        pins.hx711_dt,
        pins.hx711_sck,
        cal,
        config.hardware.full_read_samples,
        config.hardware.fast_read_samples,
    )
    .map_err(|e| eyre::eyre!("init hx711: {e}"))?;
    let relay = GpioRelay::new(pins.relay, config.hardware.relay_active_low)
        .map_err(|e| eyre::eyre!("init relay: {e}"))?;
    FeedingEngineBuilder::new()
        .with_weight_sensor(sensor)
        .with_relay(relay)
        .with_config(feeding)
        .with_completion_hook(move |o| {
            let _ = tx.try_send(o);
        })
        .build()
}

#[cfg(feature = "hardware")]
fn load_scale_cal(args: &Cli, config: &feeder_config::Config) -> Result<feeder_hardware::ScaleCal> {
    if let Some(path) = &args.calibration {
        let cal = feeder_config::load_calibration_csv(path)?;
        tracing::info!(path = %path.display(), "calibration loaded from CSV");
        Ok(feeder_hardware::ScaleCal {
            kg_per_count: cal.kg_per_count,
            zero_counts: cal.zero_counts,
            offset_kg: 0.0,
        })
    } else if let Some(p) = config.calibration {
        Ok(feeder_hardware::ScaleCal {
            kg_per_count: p.kg_per_count,
            zero_counts: p.zero_counts,
            offset_kg: p.offset_kg,
        })
    } else {
        eyre::bail!("no calibration available: pass --calibration or add [calibration] to the config")
    }
}

#[cfg(not(feature = "hardware"))]
fn self_check(args: &Cli, config: &feeder_config::Config) -> Result<()> {
    use feeder_traits::WeightSensor;
    let hopper = feeder_hardware::SimHopper::new(args.sim_initial_kg, args.sim_flow_kg_s);
    let mut sensor = hopper.sensor();
    let kg = sensor
        .read_weight(Duration::from_millis(config.hardware.sensor_read_timeout_ms))
        .map_err(|e| eyre::eyre!("scale read failed: {e}"))?;
    println!("self-check ok (simulated scale: {kg:.3} kg)");
    Ok(())
}

#[cfg(feature = "hardware")]
fn self_check(args: &Cli, config: &feeder_config::Config) -> Result<()> {
    use feeder_traits::WeightSensor;
    let pins = config
        .pins
        .ok_or_else(|| eyre::eyre!("config [pins] section is required for hardware builds"))?;
    let cal = load_scale_cal(args, config)?;
    let mut sensor = feeder_hardware::HardwareWeightSensor::new(
        pins.hx711_dt,
        pins.hx711_sck,
        cal,
        config.hardware.full_read_samples,
        config.hardware.fast_read_samples,
    )
    .map_err(|e| eyre::eyre!("init hx711: {e}"))?;
    let kg = sensor
        .read_weight(Duration::from_millis(config.hardware.sensor_read_timeout_ms))
        .map_err(|e| eyre::eyre!("scale read failed: {e}"))?;
    println!("self-check ok (scale: {kg:.3} kg)");
    Ok(())
}

fn emit_rejection(json: bool, trigger: FeedingTrigger, result: FeedingResult) {
    if json {
        let line = serde_json::json!({
            "event": "feed_rejected",
            "trigger": format!("{trigger:?}"),
            "result": format!("{result:?}"),
        });
        println!("{line}");
    } else {
        println!("{trigger:?} feed rejected: {result:?}");
    }
}

fn emit_outcome(json: bool, o: &FeedingOutcome) {
    if json {
        let line = serde_json::json!({
            "event": "feed_complete",
            "trigger": format!("{:?}", o.trigger),
            "result": format!("{:?}", o.result),
            "dispensed_kg": o.dispensed_kg,
            "target_kg": o.target_kg,
        });
        println!("{line}");
    } else {
        println!(
            "{:?} feed finished: {:?} ({:.3} kg of {:.3} kg)",
            o.trigger, o.result, o.dispensed_kg, o.target_kg
        );
    }
}
