//! Strain CLI: breeding provenance ledger with proof-of-work admission
//!
//! Commands:
//!   strain genesis  : import an external strain as a genesis record
//!   strain breed    : cross one or two recorded parents
//!   strain verify   : check a record and its whole ancestry
//!   strain lineage  : walk ancestors or descendants
//!   strain audit    : re-validate every record in the ledger file
//!   strain stats    : show ledger statistics
//!   strain demo     : run a full in-memory demo

use rand::Rng;
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use strain_ledger::config::DEFAULT_CONFIG_FILE;
use strain_ledger::ledger::{BreedingEventRecord, Direction, FixedDifficulty, GeneticLedger};
use strain_ledger::pow::{MiningConfig, MiningStrategy};
use strain_ledger::storage::frame;
use strain_ledger::{
    BredRecord, BreedError, BreedingRequest, BreedingService, Fingerprint, GenotypeDigest, LedgerStore,
    MineError, ProofOfWorkEngine, StoreError, StrainConfig,
};

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        Strain Ledger v0.1                                    ║
║        Breeding provenance with proof-of-work admission      ║
╚══════════════════════════════════════════════════════════════╝

Usage: strain <command> [options]

Commands:
  genesis  <payload> [breeder]                 Record an externally sourced strain
  breed    <parent_a> [parent_b] <payload>     Record a cross (or selfing with one parent)
  verify   <fingerprint>                       Verify a record and its ancestry
  lineage  <fingerprint> [up|down]             List ancestors (up) or descendants (down)
  audit                                        Re-validate the whole ledger file
  stats                                        Show ledger statistics
  demo                                         Run an in-memory demo

Fingerprints may be abbreviated to any unique prefix.

Configuration: {config} in the working directory, overridden by
STRAIN_STORE and STRAIN_DIFFICULTY.

Examples:
  strain genesis "blue-dream:seed-lot-7" alice
  strain breed 0a3f91c2 7be0d113 "blue-dream x og-kush F1"
  strain lineage 5c1e
  strain verify 5c1e2b9d
"#,
        config = DEFAULT_CONFIG_FILE
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let config = StrainConfig::load_or_default(DEFAULT_CONFIG_FILE);

    match args[1].as_str() {
        "genesis" => cmd_genesis(&config, &args[2..]).await,
        "breed" => cmd_breed(&config, &args[2..]).await,
        "verify" => cmd_verify(&config, &args[2..]),
        "lineage" => cmd_lineage(&config, &args[2..]),
        "audit" => cmd_audit(&config),
        "stats" => cmd_stats(&config),
        "demo" => cmd_demo(&config).await,
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

/// Open the configured store, reporting why if it cannot be used
fn open_store(config: &StrainConfig) -> Option<LedgerStore> {
    match LedgerStore::open(&config.store_path, Arc::new(FixedDifficulty(config.difficulty))) {
        Ok(store) => {
            println!("  Ledger: {} records in {}", store.ledger().len(), config.store_path);
            Some(store)
        }
        Err(StoreError::Corrupted { records, damage }) => {
            eprintln!("  Ledger {} failed validation:", config.store_path);
            if let Some(damage) = damage {
                eprintln!("    damaged file: {}", damage);
            }
            for fp in records {
                eprintln!("    corrupted: {}", fp);
            }
            eprintln!("  Run `strain audit` for details and restore from a backup.");
            None
        }
        Err(e) => {
            eprintln!("  Failed to open {}: {}", config.store_path, e);
            None
        }
    }
}

fn save_store(store: LedgerStore) {
    let path = store.path().display().to_string();
    match store.close() {
        Ok(()) => println!("  Saved to {}", path),
        Err(e) => eprintln!("  Failed to save: {}", e),
    }
}

/// Accept a full fingerprint or a unique hex prefix of one
fn resolve(ledger: &GeneticLedger, arg: &str) -> Option<Fingerprint> {
    if let Ok(fp) = arg.parse::<Fingerprint>() {
        return Some(fp);
    }
    let prefix = arg.to_ascii_lowercase();
    let matching: Vec<Fingerprint> = ledger
        .snapshot()
        .records()
        .iter()
        .map(|r| r.fingerprint())
        .filter(|fp| fp.to_hex().starts_with(&prefix))
        .collect();
    match matching.as_slice() {
        [fp] => Some(*fp),
        [] => {
            eprintln!("  No record matching '{}'", arg);
            None
        }
        _ => {
            eprintln!("  '{}' is ambiguous ({} records match)", arg, matching.len());
            None
        }
    }
}

/// Run one request, cancelling it cleanly on Ctrl-C
async fn breed_interruptible(
    service: &BreedingService,
    request: BreedingRequest,
) -> Result<BredRecord, BreedError> {
    let id = request.id;
    let breeding = service.breed(request);
    tokio::pin!(breeding);
    tokio::select! {
        result = &mut breeding => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\n  Interrupted, cancelling request {}", id);
            service.cancel(&id);
            breeding.await
        }
    }
}

fn service_for(config: &StrainConfig, ledger: Arc<GeneticLedger>) -> BreedingService {
    BreedingService::new(ledger, ProofOfWorkEngine::new(config.mining.clone()))
}

async fn cmd_genesis(config: &StrainConfig, args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: strain genesis <payload> [breeder]");
        return;
    }
    let genotype = GenotypeDigest::of(args[0].as_bytes());
    let breeder = args.get(1).cloned().unwrap_or_else(|| config.breeder.clone());

    let Some(store) = open_store(config) else { return };
    let service = service_for(config, store.ledger().clone());
    println!("  Mining genesis record at difficulty {}...", config.difficulty);

    match breed_interruptible(&service, BreedingRequest::genesis(genotype, breeder)).await {
        Ok(bred) => {
            println!(
                "  Recorded {} (generation {}) after {} attempts in {:?}",
                bred.fingerprint, bred.generation, bred.attempts, bred.elapsed
            );
            save_store(store);
        }
        Err(e) => eprintln!("  Genesis failed: {}", e),
    }
}

async fn cmd_breed(config: &StrainConfig, args: &[String]) {
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: strain breed <parent_a> [parent_b] <payload>");
        return;
    }
    let Some(store) = open_store(config) else { return };
    let ledger = store.ledger().clone();

    let (parent_args, payload) = args.split_at(args.len() - 1);
    let mut parents = Vec::with_capacity(parent_args.len());
    for arg in parent_args {
        let Some(fp) = resolve(&ledger, arg) else { return };
        parents.push(fp);
    }

    let genotype = GenotypeDigest::of(payload[0].as_bytes());
    let request = BreedingRequest::new(parents, genotype, config.breeder.clone());
    let service = service_for(config, ledger);
    println!("  Mining offspring record at difficulty {}...", config.difficulty);

    match breed_interruptible(&service, request).await {
        Ok(bred) => {
            println!(
                "  Recorded {} (generation {}) after {} attempts in {:?}",
                bred.fingerprint, bred.generation, bred.attempts, bred.elapsed
            );
            save_store(store);
        }
        Err(BreedError::Mine(MineError::TimedOut { attempts, elapsed })) => {
            eprintln!(
                "  No nonce found in {:?} ({} attempts); raise mining.time_budget_ms or retry",
                elapsed, attempts
            );
        }
        Err(e) => eprintln!("  Breeding failed: {}", e),
    }
}

fn cmd_verify(config: &StrainConfig, args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: strain verify <fingerprint>");
        return;
    }
    let Some(store) = open_store(config) else { return };
    let ledger = store.ledger().clone();
    let Some(fp) = resolve(&ledger, &args[0]) else { return };

    let service = service_for(config, ledger);
    let report = service.verify(&fp);
    println!("\n  Verification of {}", report.fingerprint.short());
    println!("  {}", "=".repeat(40));
    println!("  Valid:      {}", if report.is_valid { "yes" } else { "NO" });
    match report.generation {
        Some(g) => println!("  Generation: {}", g),
        None => println!("  Generation: (not in ledger)"),
    }
    if !report.lineage_path.is_empty() {
        let path: Vec<String> = report.lineage_path.iter().map(|fp| fp.short()).collect();
        println!("  Path:       {}", path.join(" -> "));
    }
}

fn cmd_lineage(config: &StrainConfig, args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: strain lineage <fingerprint> [up|down]");
        return;
    }
    let direction = match args.get(1).map(String::as_str) {
        None | Some("up") => Direction::Up,
        Some("down") => Direction::Down,
        Some(other) => {
            eprintln!("  Unknown direction '{}', expected up or down", other);
            return;
        }
    };

    let Some(store) = open_store(config) else { return };
    let ledger = store.ledger();
    let Some(fp) = resolve(ledger, &args[0]) else { return };

    let walk = match direction {
        Direction::Up => ledger.ancestors(&fp),
        Direction::Down => ledger.descendants(&fp),
    };
    let label = match direction {
        Direction::Up => "Ancestors",
        Direction::Down => "Descendants",
    };

    println!("\n  {} of {}", label, fp.short());
    let mut count = 0;
    for related in walk {
        count += 1;
        match ledger.get_record(&related) {
            Some(record) => println!("  {}", record.summary()),
            None => println!("  {}", related.short()),
        }
    }
    if count == 0 {
        println!("  (none)");
    }
}

fn cmd_audit(config: &StrainConfig) {
    let file = match File::open(&config.store_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("  Cannot read {}: {}", config.store_path, e);
            return;
        }
    };
    let salvage = match frame::decode_salvage(BufReader::new(file)) {
        Ok(salvage) => salvage,
        Err(e) => {
            eprintln!("  {} is not a readable ledger: {}", config.store_path, e);
            return;
        }
    };

    let total = salvage.records.len();
    let ledger = GeneticLedger::restore(salvage.records, Arc::new(FixedDifficulty(config.difficulty)));
    if salvage.damage.is_some() {
        ledger.mark_corrupted();
    }
    let findings = ledger.audit();

    println!("\n  Audit of {}", config.store_path);
    println!("  {}", "=".repeat(40));
    println!("  Records:   {}", total);
    if let Some(damage) = &salvage.damage {
        println!("  Damage:    {}", damage);
    }
    println!("  Corrupted: {}", findings.len());
    for finding in &findings {
        println!(
            "    #{} {}: {}",
            finding.position,
            finding.fingerprint.short(),
            finding.reason
        );
    }
    println!("  Status:    {:?}", ledger.status());
}

fn cmd_stats(config: &StrainConfig) {
    let Some(store) = open_store(config) else { return };
    let stats = store.ledger().stats();
    println!("\n  Strain Ledger Statistics");
    println!("  {}", "=".repeat(40));
    println!("  Records:        {}", stats.total_records);
    println!("  Genesis:        {}", stats.genesis_records);
    println!("  Max generation: {}", stats.max_generation);
    println!("  Breeders:       {}", stats.distinct_breeders);
    println!("  Status:         {:?}", stats.status);
}

fn random_genotype(label: &str) -> GenotypeDigest {
    let mut sample = [0u8; 32];
    rand::thread_rng().fill(&mut sample);
    let mut payload = label.as_bytes().to_vec();
    payload.extend_from_slice(&sample);
    GenotypeDigest::of(&payload)
}

async fn cmd_demo(config: &StrainConfig) {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║              Strain Ledger: Full Demo                        ║
║       Genesis + Crosses + Lineage + Audit + Cancel           ║
╚══════════════════════════════════════════════════════════════╝
"#
    );

    let difficulty = config.difficulty.min(12);
    let ledger = Arc::new(GeneticLedger::new(FixedDifficulty(difficulty)));
    let service = BreedingService::new(
        ledger.clone(),
        ProofOfWorkEngine::new(MiningConfig {
            strategy: MiningStrategy::Auto,
            ..config.mining.clone()
        }),
    );

    // Step 1: genesis imports
    println!("Step 1: Importing founder strains at difficulty {}...", difficulty);
    println!("{}", "-".repeat(60));
    let mut founders = Vec::new();
    for name in ["landrace-afghan", "haze-sativa", "ruderalis-auto"] {
        match service
            .breed(BreedingRequest::genesis(random_genotype(name), "seed-bank"))
            .await
        {
            Ok(bred) => {
                println!("  {:<16} {} ({} attempts)", name, bred.fingerprint.short(), bred.attempts);
                founders.push(bred.fingerprint);
            }
            Err(e) => {
                eprintln!("  Failed to import {}: {}", name, e);
                return;
            }
        }
    }

    // Step 2: crosses
    println!("\nStep 2: Breeding F1 and a backcross...");
    println!("{}", "-".repeat(60));
    let f1 = match service
        .breed(BreedingRequest::cross(
            founders[0],
            founders[1],
            random_genotype("f1"),
            "alice",
        ))
        .await
    {
        Ok(bred) => bred,
        Err(e) => {
            eprintln!("  F1 failed: {}", e);
            return;
        }
    };
    println!("  F1        {} generation {}", f1.fingerprint.short(), f1.generation);

    let backcross = match service
        .breed(BreedingRequest::cross(
            f1.fingerprint,
            founders[0],
            random_genotype("bx1"),
            "alice",
        ))
        .await
    {
        Ok(bred) => bred,
        Err(e) => {
            eprintln!("  Backcross failed: {}", e);
            return;
        }
    };
    println!(
        "  BX1       {} generation {}",
        backcross.fingerprint.short(),
        backcross.generation
    );

    let auto = match service
        .breed(BreedingRequest::cross(
            backcross.fingerprint,
            founders[2],
            random_genotype("auto-f1"),
            "bob",
        ))
        .await
    {
        Ok(bred) => bred,
        Err(e) => {
            eprintln!("  Autoflower cross failed: {}", e);
            return;
        }
    };
    println!("  Auto F1   {} generation {}", auto.fingerprint.short(), auto.generation);

    // Step 3: lineage
    println!("\nStep 3: Lineage of the autoflower cross...");
    println!("{}", "-".repeat(60));
    for ancestor in ledger.ancestors(&auto.fingerprint) {
        if let Some(record) = ledger.get_record(&ancestor) {
            println!("  {}", record.summary());
        }
    }
    let descendants: Vec<String> = ledger
        .descendants(&founders[0])
        .map(|fp| fp.short())
        .collect();
    println!("  Descendants of founder 1: {}", descendants.join(", "));

    // Step 4: verification
    println!("\nStep 4: Verification report...");
    println!("{}", "-".repeat(60));
    let report = service.verify(&auto.fingerprint);
    let path: Vec<String> = report.lineage_path.iter().map(|fp| fp.short()).collect();
    println!("  Valid: {}  Generation: {:?}", report.is_valid, report.generation);
    println!("  Path:  {}", path.join(" -> "));

    // Step 5: audit a tampered copy
    println!("\nStep 5: Tamper detection...");
    println!("{}", "-".repeat(60));
    let mut records = ledger.snapshot().records().to_vec();
    let victim = records.len() / 2;
    let mut forged = records[victim].fingerprint();
    forged.0[31] ^= 0x01;
    records[victim] = BreedingEventRecord::seal(
        records[victim].candidate().clone(),
        records[victim].nonce(),
        forged,
    );
    let copy = GeneticLedger::restore(records, Arc::new(FixedDifficulty(difficulty)));
    for finding in copy.audit() {
        println!("  #{} {}: {}", finding.position, finding.fingerprint.short(), finding.reason);
    }
    println!("  Tampered copy status: {:?}", copy.status());
    println!("  Original status:      {:?}", ledger.status());

    // Step 6: cancellation
    println!("\nStep 6: Cancelling an infeasible request...");
    println!("{}", "-".repeat(60));
    let hard = Arc::new(
        BreedingService::new(
            Arc::new(GeneticLedger::new(FixedDifficulty(200))),
            ProofOfWorkEngine::new(config.mining.clone()),
        )
        .with_time_budget(Duration::from_secs(30)),
    );
    let request = BreedingRequest::genesis(random_genotype("unobtainium"), "carol");
    let id = request.id;
    let worker = {
        let hard = hard.clone();
        tokio::spawn(async move { hard.breed(request).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    hard.cancel(&id);
    match worker.await {
        Ok(Err(BreedError::Mine(MineError::Cancelled { attempts, .. }))) => {
            println!("  Cancelled after {} attempts; ledger has {} records", attempts, hard.ledger().len());
        }
        Ok(other) => println!("  Unexpected outcome: {:?}", other),
        Err(e) => eprintln!("  Worker task failed: {}", e),
    }

    println!("\n  {}", ledger.summary());
    println!("\nDemo complete.");
}
