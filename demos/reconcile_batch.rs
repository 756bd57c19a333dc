//! Reconcile a bank export against a month of rent charges
//!
//! Run with `RUST_LOG=debug cargo run --example reconcile_batch` to see the
//! engine's structured logs.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reconciliation_core::{
    AttemptOutcome, BatchOptions, Charge, ChargeScope, Location, MemoryStorage,
    ObligationRepository, Obligor, Reconciler,
};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

const BANK_EXPORT: &str = "\
Buchungstag;Betrag;Beguenstigter/Zahlungspflichtiger;IBAN;Verwendungszweck
01.03.2024;850,00;Anna Schmidt;DE89 3704 0044 0532 0130 00;Miete März Whg 3
04.03.2024;600,00;J. Meyer;;Miete 03/2024
06.03.2024;1.200,00;Hausverwaltung Nord;;Nebenkosten
07.03.2024;-89,90;Stadtwerke;;Abschlag Strom
08.03.2024;720,00;;;Miete
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🏠 Reconciliation Core - Monthly Rent Batch\n");

    let mut storage = MemoryStorage::new();
    let due = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
    let tenants = [
        ("t-schmidt", "Anna", "Schmidt", Some("DE89370400440532013000"), "850.00", "Whg 3"),
        ("t-meyer", "Jonas", "Meyer", None, "600.00", "Whg 5"),
        ("t-koch", "Lena", "Koch", None, "720.00", "Whg 7"),
        ("t-braun", "Mia", "Braun", None, "720.00", "Whg 8"),
    ];

    // 1. Seed obligors, locations and the March charges
    println!("📋 Seeding charges...");
    for (reference, first, last, iban, amount, unit) in tenants {
        let mut obligor = Obligor::new(reference.to_string(), first.to_string(), last.to_string());
        if let Some(iban) = iban {
            obligor = obligor.with_iban(iban);
        }
        storage.save_obligor(&obligor).await?;

        let location_ref = format!("loc-{reference}");
        storage
            .save_location(&Location::new(location_ref.clone(), unit.to_string()))
            .await?;

        let charge = Charge::new(
            format!("{reference}-2024-03"),
            "owner-1".to_string(),
            reference.to_string(),
            location_ref,
            BigDecimal::from_str(amount)?,
            due,
        );
        println!("  ✓ {} owes {} ({})", obligor.full_name(), amount, unit);
        storage.save_charge(&charge).await?;
    }
    println!();

    // 2. Import the bank export and reconcile it
    let mut reconciler = Reconciler::new(storage.clone());
    let table = reconciler.import_delimited("bank-2024-03", BANK_EXPORT).await?;
    println!(
        "📥 Imported {} rows into {} ({} columns)\n",
        table.row_count,
        table.table_name,
        table.columns.len()
    );

    let scope = ChargeScope::for_owner("owner-1");
    let result = reconciler
        .reconcile_upload("bank-2024-03", &scope, &BatchOptions::default())
        .await?;

    println!("🔎 Batch results:");
    for detail in &result.details {
        println!(
            "  {:<10} payment {} -> {} (Score: {:.2}, Confidence: {:.0}%)",
            detail.outcome.as_str(),
            &detail.payment_id[..8],
            detail.charge_id.as_deref().unwrap_or("-"),
            detail.score,
            detail.confidence * 100.0
        );
        for warning in &detail.warnings {
            println!("             ⚠ {warning}");
        }
    }
    println!(
        "\n  processed {}, matched {}, no match {}, ambiguous {}, skipped {}, errors {}",
        result.processed,
        result.matched,
        result.no_match,
        result.ambiguous,
        result.skipped,
        result.errors
    );
    println!("  match rate {:.0}%\n", result.match_rate() * 100.0);

    // 3. Review candidates for the payments the engine did not match
    for detail in result
        .details
        .iter()
        .filter(|d| matches!(d.outcome, AttemptOutcome::Ambiguous | AttemptOutcome::NoMatch))
    {
        println!("🤔 Suggestions for payment {}:", &detail.payment_id[..8]);
        let suggestions = reconciler.suggest(&detail.payment_id, &scope, 0.2).await?;
        for card in &suggestions {
            println!("  {} {}", card.charge_id, card.rationale("Candidate"));
        }

        if let Some(best) = suggestions.first() {
            let m = reconciler
                .apply_manual(
                    &detail.payment_id,
                    &best.charge_id,
                    best.allocatable.clone(),
                    Some("confirmed by property manager".to_string()),
                )
                .await?;
            println!("  ✓ Manually matched to {}\n", m.charge_id);
        }
    }

    // 4. Mark what is still unpaid as overdue
    let as_of = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
    let overdue = reconciler.refresh_overdue(&scope, as_of).await?;
    println!("⏰ {overdue} charges overdue as of {as_of}");

    for context in reconciler.storage().list_open_charges(&scope).await? {
        println!(
            "  {} {} remaining {}",
            context.charge.id, context.charge.status, context.charge.remaining()
        );
    }

    Ok(())
}
