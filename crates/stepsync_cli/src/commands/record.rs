//! Record command implementation.

use std::path::Path;
use stepsync_protocol::CumulativeRecord;

/// Decodes a CBOR record and prints it as JSON.
pub fn decode(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let record = read_cbor(path)?;
    println!("{}", record.to_json()?);
    Ok(())
}

/// Encodes a JSON record as CBOR.
pub fn encode(path: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let record = CumulativeRecord::from_json(&json)?;
    std::fs::write(output, record.encode()?)?;
    println!(
        "Encoded record for {} ({} steps) to {}",
        record.user_id,
        record.steps,
        output.display()
    );
    Ok(())
}

fn read_cbor(path: &Path) -> Result<CumulativeRecord, Box<dyn std::error::Error>> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(CumulativeRecord::decode(&bytes)?)
}
