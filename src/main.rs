use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shield::engine::responses::LogNotifier;
use shield::{
    AntiDebugGuard, BackgroundDetector, DeviceIdentityProvider, GuardOutcome, LogOnly, Orchestrator,
    ResponsePolicy, ShieldConfig, SystemDevice, TerminateOnCompromise, TerminationMode,
};

/// Upper bound on how long the demo waits for its detection pass.
const PASS_DEADLINE: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    println!("==================================================");
    println!("     Jailbreak / Instrumentation Detection        ");
    println!("==================================================");

    let config = ShieldConfig::from_env();
    config.log_summary();

    // ===================================================================
    // ANTI-DEBUG GUARD (Run first, before anything worth protecting)
    // ===================================================================

    println!("\n[*] Phase 0: Anti-Debug Guard");
    let mode = if config.graceful {
        TerminationMode::Report
    } else {
        TerminationMode::Immediate
    };
    if AntiDebugGuard::system(mode).engage() == GuardOutcome::Traced {
        println!("[!] Tracer attached, continuing in graceful mode.");
    }

    // ===================================================================
    // DETECTION PASS (Off the main thread)
    // ===================================================================

    println!("\n[*] Phase 1: Detection Pass");
    let orchestrator = match Orchestrator::standard(&config, None) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            error!(error = %err, "artifact catalog unusable");
            return ExitCode::FAILURE;
        }
    };
    info!(probes = orchestrator.probe_count(), concurrent = config.concurrent, "starting detection");
    let mut detector = BackgroundDetector::new(orchestrator, config.concurrent);
    let _worker = detector.schedule();

    // ===================================================================
    // RESPONSE (Back on the main thread)
    // ===================================================================

    let policy: Box<dyn ResponsePolicy> = if config.enforce {
        Box::new(TerminateOnCompromise::new(Arc::new(LogNotifier)))
    } else {
        Box::new(LogOnly::with_notifier(Arc::new(LogNotifier)))
    };

    detector.deliver_within(policy.as_ref(), PASS_DEADLINE);

    println!("\n==================================================");
    match detector.last_delivered() {
        Some(report) => println!("[*] Pass {}: {}", report.sequence, report.verdict.summary()),
        None => println!("[!] Detection pass did not finish in time."),
    }
    println!("[*] Device: {}", SystemDevice.current());
    println!("==================================================");

    ExitCode::SUCCESS
}
