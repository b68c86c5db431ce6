//! Command-line front end for qcap studies.
//!
//! Studies run against the crate's linearized simulation backend, which is
//! useful for validating configurations and rehearsing a study before
//! pointing it at a production engine. Engine bindings implement
//! [`qcap_core::PowerFlowOracle`] and slot in where [`SimOracle`] does here.

use anyhow::{bail, Result};
use clap::Parser;
use qcap_algo::sim::{SimOracle, SimUnit};
use qcap_algo::{dispatch, envelope, voltage, EnvelopeStudy, TraceWriter};
use qcap_core::{
    ControlGroup, Megavars, Megawatts, MonitoredInterface, PowerFlowOracle, StudyLog,
};
use qcap_scenarios::orchestrator::{self, ScenarioKind, ScenarioStudy, TechnologyGroup};
use qcap_scenarios::{load_config, write_manifest, write_report, CaseMeasurements, RunManifest, StudyConfig};
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

mod cli;
use cli::{Cli, Commands, ScenarioArg, TuneMode};

impl From<ScenarioArg> for ScenarioKind {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Storage => ScenarioKind::Storage,
            ScenarioArg::Generation => ScenarioKind::Generation,
            ScenarioArg::Hybrid => ScenarioKind::Hybrid,
        }
    }
}

/// Build the simulation backend from the configured plant.
fn sim_from_config(config: &StudyConfig) -> Result<SimOracle> {
    let (from, to, circuit) = match &config.interface {
        MonitoredInterface::Branch { from, to, circuit } => {
            (from.value(), to.value(), circuit.as_str())
        }
        MonitoredInterface::MachineTerminal { .. } => {
            bail!("the simulation backend monitors a branch interface")
        }
    };
    let mut sim = SimOracle::new(from, to, circuit);
    for group_config in &config.groups {
        let group = group_config.to_group()?;
        for unit in group.units() {
            sim.add_unit(
                unit.bus.value(),
                unit.unit.as_str(),
                SimUnit::new(unit.regulated_bus, unit.nameplate.value()),
            );
        }
    }
    for tap in &config.taps {
        sim.add_tap(tap.reference.clone(), tap.current_ratio);
    }
    for shunt in &config.shunts {
        sim.add_shunt(shunt.bus.value(), &shunt.id, 0.0);
    }
    Ok(sim)
}

/// All configured units as one group, for commands that tune the whole
/// plant together.
fn merged_group(config: &StudyConfig) -> Result<ControlGroup> {
    let mut units = Vec::new();
    for group_config in &config.groups {
        units.extend(group_config.to_group()?.units().iter().cloned());
    }
    Ok(ControlGroup::new("Plant", units)?)
}

fn emit_log(log: &StudyLog) {
    for line in log.lines() {
        info!("{line}");
    }
}

fn run_tune(config: &StudyConfig, mode: TuneMode, trace: Option<&std::path::Path>) -> Result<()> {
    let mut sim = sim_from_config(config)?;
    sim.load_case(&config.case_file)?;
    let group = merged_group(config)?;
    let options = config.options();
    let mut log = StudyLog::new();
    // A Q-only pass extends an existing trace, so `tune --mode p` followed
    // by `tune --mode q` builds the one P-then-Q table file.
    let mut trace_writer = match trace {
        Some(path) if matches!(mode, TuneMode::Q) && path.exists() => {
            Some(TraceWriter::append(path)?)
        }
        Some(path) => Some(TraceWriter::create(path)?),
        None => None,
    };

    let mut all_converged = true;
    if matches!(mode, TuneMode::P | TuneMode::Pq) {
        let session = dispatch::tune_p(
            &mut sim,
            &group,
            &config.interface,
            Megawatts(config.p_net),
            options,
            &mut log,
            trace_writer.as_mut(),
        )?;
        all_converged &= session.converged();
    }
    if matches!(mode, TuneMode::Q | TuneMode::Pq) {
        let session = voltage::tune_q(
            &mut sim,
            &group,
            &config.interface,
            Megavars(config.q_target),
            options,
            &mut log,
            trace_writer.as_mut(),
        )?;
        all_converged &= session.converged();
    }
    if let Some(writer) = trace_writer.as_mut() {
        writer.flush()?;
    }

    emit_log(&log);
    if all_converged {
        info!("tuning complete");
    } else {
        warn!("tuning finished without reaching tolerance; last setpoints retained");
    }
    Ok(())
}

fn run_envelope(
    config: &StudyConfig,
    report: Option<&std::path::Path>,
    manifest: Option<&std::path::Path>,
) -> Result<()> {
    let mut sim = sim_from_config(config)?;
    let group = merged_group(config)?;
    let study = EnvelopeStudy::new(group, config.interface.clone(), Megawatts(config.p_net))
        .with_taps(config.taps.clone())
        .with_shunts(config.shunts.clone());

    let mut log = StudyLog::new();
    let outcomes = envelope::run_all(
        &mut sim,
        &config.case_file,
        &study,
        &config.report_points,
        &mut log,
    )?;
    emit_log(&log);
    for outcome in &outcomes {
        if !outcome.achieved {
            warn!("{}: {}", outcome.case.display_name(), outcome.message);
        }
    }

    if let Some(path) = report {
        let cases: Vec<CaseMeasurements> = outcomes
            .iter()
            .map(|o| CaseMeasurements {
                case: o.case.display_name().to_string(),
                points: o.measurements.clone(),
            })
            .collect();
        write_report(path, &cases)?;
        info!("report written: {}", path.display());
    }
    if let Some(path) = manifest {
        let snapshots: Vec<_> = outcomes.iter().map(|o| o.snapshot.clone()).collect();
        let manifest = RunManifest::new("envelope", &config.case_file, &snapshots, &log);
        write_manifest(path, &manifest)?;
        info!("manifest written: {}", path.display());
    }
    Ok(())
}

fn run_scenario(
    config: &StudyConfig,
    kind: ScenarioKind,
    report: Option<&std::path::Path>,
    manifest: Option<&std::path::Path>,
) -> Result<()> {
    let mut sim = sim_from_config(config)?;
    let technologies = config
        .groups
        .iter()
        .map(|gc| {
            Ok(TechnologyGroup {
                group: gc.to_group()?,
                storage: gc.storage,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let study = ScenarioStudy {
        kind,
        technologies,
        interface: config.interface.clone(),
        p_net: Megawatts(config.p_net),
        q_target: Megavars(config.q_target),
        report_points: config.report_points.clone(),
        options: config.options(),
    };

    let outcome = orchestrator::run(&mut sim, &config.case_file, &study)?;
    emit_log(&outcome.log);
    if outcome.success {
        info!("{}", outcome.message);
    } else {
        warn!("{}", outcome.message);
    }

    if let Some(path) = report {
        let cases: Vec<CaseMeasurements> = outcome
            .snapshots
            .iter()
            .map(|s| CaseMeasurements {
                case: s.name.clone(),
                points: s.measurements.clone(),
            })
            .collect();
        write_report(path, &cases)?;
        info!("report written: {}", path.display());
    }
    if let Some(path) = manifest {
        let manifest = RunManifest::new("scenario", &config.case_file, &outcome.snapshots, &outcome.log);
        write_manifest(path, &manifest)?;
        info!("manifest written: {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Validate { config } => {
            let study = load_config(config)?;
            let units: usize = study
                .groups
                .iter()
                .map(|g| g.buses.len())
                .sum();
            info!(
                "configuration ok: {} group(s), {} unit(s), interface {}, P_net {:.1} MW",
                study.groups.len(),
                units,
                study.interface,
                study.p_net
            );
        }
        Commands::Tune { config, mode, trace } => {
            let study = load_config(config)?;
            run_tune(&study, *mode, trace.as_deref())?;
        }
        Commands::Envelope {
            config,
            report,
            manifest,
        } => {
            let study = load_config(config)?;
            run_envelope(&study, report.as_deref(), manifest.as_deref())?;
        }
        Commands::Scenario {
            config,
            kind,
            report,
            manifest,
        } => {
            let study = load_config(config)?;
            run_scenario(&study, (*kind).into(), report.as_deref(), manifest.as_deref())?;
        }
    }
    Ok(())
}
