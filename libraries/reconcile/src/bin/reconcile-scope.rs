use std::path::PathBuf;

use reconcile::persistence::{SNAPSHOT_HEADER_LEN, snapshot_payload};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <path-to-snapshot-file>", args[0]);
        eprintln!("\nExample: {} ~/.local/share/habitual/snapshot", args[0]);
        std::process::exit(1);
    }

    let file_path = PathBuf::from(&args[1]);

    let bytes = match std::fs::read(&file_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", file_path.display(), e);
            std::process::exit(1);
        }
    };

    println!("ReconcileScope - Snapshot Analyzer");
    println!("==================================");
    println!("File: {}", file_path.display());
    println!(
        "Size: {} bytes ({:.2} KB)",
        bytes.len(),
        bytes.len() as f64 / 1024.0
    );
    println!();

    let payload = match snapshot_payload(&bytes) {
        Ok(payload) => payload,
        Err(e) => {
            println!("  ❌ {e}");
            std::process::exit(1);
        }
    };
    println!("Header: ok ({SNAPSHOT_HEADER_LEN} bytes)");
    println!();

    let snapshot: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            println!("  ❌ Payload is not valid JSON: {e}");
            std::process::exit(1);
        }
    };

    let Some(fields) = snapshot.as_object() else {
        println!("  ⚠️  Payload is not an object, nothing else to report");
        return;
    };

    println!("Collections:");
    println!("------------");

    let mut total_dirty = 0;
    let mut total_conflicts = 0;
    for (name, value) in fields {
        // Record sets are written as {"records": [{"record": .., "status": ..}], "conflicts": [..]}
        let Some(records) = value.get("records").and_then(|r| r.as_array()) else {
            println!("  {name}: (not a record set)");
            continue;
        };
        let dirty = records
            .iter()
            .filter(|entry| entry.get("status").and_then(|s| s.as_str()) == Some("dirty"))
            .count();
        let conflicts = value
            .get("conflicts")
            .and_then(|c| c.as_array())
            .map(Vec::len)
            .unwrap_or(0);
        total_dirty += dirty;
        total_conflicts += conflicts;

        println!("  {name}");
        println!("    Records: {}", records.len());
        println!("    Unsynced: {dirty}");
        if conflicts > 0 {
            println!("    ⚠️  Parked conflicts: {conflicts}");
        }
    }

    println!();
    println!("Summary:");
    println!("--------");
    if total_dirty == 0 {
        println!("  ✅ Everything has been pushed");
    } else {
        println!("  {total_dirty} record(s) waiting for the next sync");
    }
    if total_conflicts > 0 {
        println!("  ⚠️  {total_conflicts} conflict(s) need manual resolution");
    }
}
