use clap::{Parser, Subcommand};
use emr_core::{
    constants::RECONCILE_BATCH_SIZE, core_config_from_lookup, AssignmentService,
    CascadeDeleteTransaction, CoreConfig, HttpClinicalServices, PgStore, Reconciler,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "emr")]
#[command(about = "EMR coordination admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the clinical-case saga columns to the database
    Migrate,
    /// Delete a patient and every dependent row in one transaction
    DeletePatient {
        /// Patient id
        patient_id: i64,
    },
    /// Show the doctor currently assigned to a patient
    AssignedDoctor {
        /// Patient id
        patient_id: i64,
    },
    /// Replay lost patient-status syncs once
    Reconcile {
        /// Maximum number of cases to examine
        #[arg(long, default_value_t = RECONCILE_BATCH_SIZE)]
        limit: i64,
    },
}

async fn connect(cfg: &CoreConfig) -> Result<Arc<PgStore>, Box<dyn std::error::Error>> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(cfg.database_url())
        .await?;
    Ok(Arc::new(PgStore::new(pool)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'emr --help' for commands");
        return Ok(());
    };

    let cfg = core_config_from_lookup(|name| std::env::var(name).ok())?;
    let store = connect(&cfg).await?;

    match command {
        Commands::Migrate => match store.migrate().await {
            Ok(()) => println!("Migrations applied"),
            Err(e) => eprintln!("Error applying migrations: {}", e),
        },
        Commands::DeletePatient { patient_id } => {
            match CascadeDeleteTransaction::new(store).delete_patient(patient_id).await {
                Ok(result) => {
                    let c = result.counts;
                    println!(
                        "Deleted patient {}: {} prescriptions, {} intake records, {} clinical cases, {} visits",
                        patient_id,
                        c.prescriptions_by_case + c.prescriptions_by_patient,
                        c.intake_records,
                        c.clinical_cases,
                        c.visits
                    );
                }
                Err(e) => eprintln!("Error deleting patient {}: {}", patient_id, e),
            }
        }
        Commands::AssignedDoctor { patient_id } => {
            match AssignmentService::new(store).assigned_doctor(patient_id).await {
                Ok(doctor) => match doctor.doctor_id {
                    Some(id) => println!(
                        "Doctor ID: {}, Name: {}, Role: {}",
                        id,
                        doctor.name.as_ref().map_or("-", |n| n.as_str()),
                        doctor.role.as_ref().map_or("-", |r| r.as_str())
                    ),
                    None => println!("No doctor assigned to patient {}", patient_id),
                },
                Err(e) => eprintln!("Error resolving doctor: {}", e),
            }
        }
        Commands::Reconcile { limit } => {
            let services = HttpClinicalServices::from_config(&cfg, reqwest::Client::new())?;
            let reconciler = Reconciler::new(
                store,
                Arc::new(services),
                cfg.retry_policy(),
                cfg.reconcile_credential().cloned(),
            )
            .with_grace(cfg.reconcile_grace());
            match reconciler.run_once(limit).await {
                Ok(report) => println!(
                    "Examined {}, synced {}, failed {}",
                    report.examined, report.synced, report.failed
                ),
                Err(e) => eprintln!("Error reconciling: {}", e),
            }
        }
    }

    Ok(())
}
